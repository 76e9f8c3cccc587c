//! Environment seams: datagram transport and monotonic clock.
//!
//! The engine never performs I/O itself. Hosts implement [`Transport`] to put
//! datagrams on the wire and feed received ones to
//! [`crate::CoapEngine::handle_incoming_packet`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::TransportError;

/// Host-assigned identifier of a bound socket or interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub u32);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link-layer information the host attaches to a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetaInfo {
    #[default]
    None,
    /// Received on a multicast group address.
    Multicast,
    /// Routed over a radio mesh.
    RfPath { hop_count: u8, rssi: i8 },
}

impl MetaInfo {
    pub fn is_multicast(&self) -> bool {
        matches!(self, MetaInfo::Multicast)
    }
}

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetPacket {
    pub data: Vec<u8>,
    pub remote: SocketAddr,
    pub meta: MetaInfo,
}

impl NetPacket {
    pub fn new(data: Vec<u8>, remote: SocketAddr) -> Self {
        Self {
            data,
            remote,
            meta: MetaInfo::None,
        }
    }

    pub fn with_meta(mut self, meta: MetaInfo) -> Self {
        self.meta = meta;
        self
    }
}

/// Outbound datagram sink.
pub trait Transport {
    fn send(
        &mut self,
        socket: SocketHandle,
        remote: SocketAddr,
        datagram: &[u8],
    ) -> Result<(), TransportError>;
}

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;

    fn now_secs(&self) -> u64 {
        self.now_ms() / 1000
    }
}

/// Wall-clock-independent clock anchored at construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set_ms(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance_ms(secs.saturating_mul(1000));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
