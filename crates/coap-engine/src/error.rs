//! Engine error types.
//!
//! `EngineError` is what the public entry points return and what a client
//! callback receives when its exchange fails. Internal polling outcomes live in
//! [`crate::reliability::Progress`] and never surface here.

use coap_core::error::{InvalidTokenLength, MessageError, OptionError};

use crate::transport::SocketHandle;

/// Failure reported by a [`crate::transport::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport send failed: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("duplicate message id {message_id} from known endpoint")]
    Existing { message_id: u16 },

    #[error("no matching {0}")]
    NotFound(&'static str),

    #[error("bad value for option {0}")]
    BadOptionValue(u16),

    #[error("bad length for option {0}")]
    BadOptionLength(u16),

    #[error("capacity exhausted: {0}")]
    OutOfMemory(&'static str),

    #[error("invalid argument: {0}")]
    Argument(&'static str),

    #[error("unknown socket {0}")]
    Socket(SocketHandle),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    #[error("no response before deadline")]
    Timeout,

    #[error("retransmission attempts exhausted")]
    OutOfAttempts,

    #[error("exchange reset by remote")]
    RemoteReset,

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

impl From<OptionError> for EngineError {
    fn from(e: OptionError) -> Self {
        EngineError::Message(MessageError::Option(e))
    }
}

/// Errors decoding a persisted observer blob.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("bad record magic at byte {offset}")]
    BadMagic { offset: usize },

    #[error("record truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("unknown address family {0}")]
    UnknownFamily(u8),

    #[error("token error: {0}")]
    Token(#[from] InvalidTokenLength),

    #[error("option blob error: {0}")]
    Option(#[from] OptionError),
}
