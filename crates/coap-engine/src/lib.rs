//! CoAP interaction engine.
//!
//! [`CoapEngine`] tracks every exchange as an [`interaction::Interaction`]
//! in a generational arena and advances them from two entry points: inbound
//! datagrams ([`CoapEngine::handle_incoming_packet`]) and the time-driven work
//! loop ([`CoapEngine::do_work`]). Resources, observers and blockwise
//! transfers are handled here; I/O and time come from the host through
//! [`Transport`] and [`Clock`].

pub mod arena;
pub mod blockwise;
pub mod config;
pub mod engine;
pub mod error;
pub mod interaction;
pub mod persist;
pub mod reliability;
pub mod resource;
pub mod testing;
pub mod transport;

pub use arena::Handle;
pub use blockwise::{Block1Assembler, Block1Outcome, set_payload_checked};
pub use config::EngineConfig;
pub use engine::CoapEngine;
pub use error::{EngineError, PersistError, TransportError};
pub use interaction::{Confirm, Role, State};
pub use resource::{
    AllowedMethods, HandlerResult, Notifier, Observer, ObserverId, RequestContext, RequestHandler,
    Resource, ResourceId, ResourceRegistry,
};
pub use transport::{Clock, ManualClock, MetaInfo, NetPacket, SocketHandle, SystemClock, Transport};
