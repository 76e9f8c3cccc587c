//! Engine transport over tokio UDP sockets.
//!
//! The engine sends from inside its mutex, so sends never await: datagrams go
//! out through `try_send_to` and a full socket buffer is reported as a
//! transport error (the engine's retransmission covers CON traffic).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use coap_engine::{SocketHandle, Transport, TransportError};

/// Size of the receive buffer for `UdpSocket::recv_from`.
pub const UDP_RECV_BUFFER: usize = 2048;

/// Maps engine socket handles to bound UDP sockets.
#[derive(Debug, Default)]
pub struct UdpTransport {
    sockets: HashMap<SocketHandle, Arc<UdpSocket>>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_socket(&mut self, handle: SocketHandle, socket: Arc<UdpSocket>) {
        self.sockets.insert(handle, socket);
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, socket: SocketHandle, remote: SocketAddr, datagram: &[u8]) -> Result<(), TransportError> {
        let udp = self
            .sockets
            .get(&socket)
            .ok_or_else(|| TransportError(format!("no UDP socket for handle {socket}")))?;
        let sent = udp
            .try_send_to(datagram, remote)
            .map_err(|e| TransportError(format!("send to {remote} failed: {e}")))?;
        if sent != datagram.len() {
            return Err(TransportError(format!(
                "sent {} of {} bytes",
                sent,
                datagram.len()
            )));
        }
        tracing::trace!(%socket, %remote, len = sent, "datagram sent");
        Ok(())
    }
}
