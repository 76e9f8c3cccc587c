//! Test doubles for hosts and integration tests.
//!
//! ```rust,ignore
//! use coap_engine::testing::RecordingTransport;
//!
//! let transport = RecordingTransport::new();
//! let sent = transport.clone();
//! let mut engine = CoapEngine::new(config, transport, clock);
//! // ... drive the engine ...
//! assert_eq!(sent.sent().len(), 1);
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use coap_core::error::MessageError;
use coap_core::message::Message;

use crate::error::TransportError;
use crate::transport::{SocketHandle, Transport};

/// One datagram handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub socket: SocketHandle,
    pub remote: SocketAddr,
    pub data: Vec<u8>,
}

impl SentDatagram {
    pub fn message(&self) -> Result<Message, MessageError> {
        Message::parse_with_limit(&self.data, usize::MAX)
    }
}

#[derive(Debug, Default)]
struct Shared {
    sent: Vec<SentDatagram>,
    fail_sends: bool,
}

/// Transport that records every datagram. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.lock().sent.clone()
    }

    /// Parsed messages in send order.
    pub fn messages(&self) -> Result<Vec<Message>, MessageError> {
        self.lock().sent.iter().map(SentDatagram::message).collect()
    }

    /// Remove and parse everything recorded so far.
    pub fn drain(&self) -> Result<Vec<Message>, MessageError> {
        let drained: Vec<SentDatagram> = self.lock().sent.drain(..).collect();
        drained.iter().map(SentDatagram::message).collect()
    }

    pub fn clear(&self) {
        self.lock().sent.clear();
    }

    /// Make subsequent sends fail with a transport error.
    pub fn set_failing(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for RecordingTransport {
    fn send(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        datagram: &[u8],
    ) -> Result<(), TransportError> {
        let mut shared = self.lock();
        if shared.fail_sends {
            return Err(TransportError("simulated send failure".to_string()));
        }
        shared.sent.push(SentDatagram {
            socket,
            remote,
            data: datagram.to_vec(),
        });
        Ok(())
    }
}
