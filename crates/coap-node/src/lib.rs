//! UDP host for the CoAP engine.
//!
//! This crate binds tokio UDP sockets, feeds received datagrams to a shared
//! [`coap_engine::CoapEngine`], drives its work loop on a timer and persists
//! observer registrations across restarts.

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod resources;
pub mod storage;
pub mod transport;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{Node, ShutdownHandle};
pub use storage::Storage;
