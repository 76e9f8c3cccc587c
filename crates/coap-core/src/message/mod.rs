//! CoAP message: header, token, options and payload.

pub mod code;
pub mod wire;

pub use code::Code;
pub use wire::Message;
