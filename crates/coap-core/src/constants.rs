//! Protocol constants and enumerations for CoAP (RFC 7252).

use crate::error::MessageError;

// Wire format sizes
pub const COAP_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 4;
pub const MAX_TOKEN_LEN: usize = 8;
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Largest option value the codec accepts (Proxy-Uri is 1..1034 bytes).
pub const MAX_OPTION_VALUE_SIZE: usize = 1034;

/// Default payload limit for a single datagram. Larger bodies go blockwise.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Datagrams up to this size are built in a stack buffer.
pub const SMALL_DATAGRAM_SIZE: usize = 16;

// Option header nibble sentinels
pub const NIBBLE_EXT_8BIT: u8 = 13;
pub const NIBBLE_EXT_16BIT: u8 = 14;
pub const NIBBLE_RESERVED: u8 = 15;
pub const EXT_8BIT_BASE: usize = 13;
pub const EXT_16BIT_BASE: usize = 269;

/// CoAP message type (2-bit `T` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Con = 0,
    Non = 1,
    Ack = 2,
    Rst = 3,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, MessageError> {
        match v {
            0 => Ok(MessageType::Con),
            1 => Ok(MessageType::Non),
            2 => Ok(MessageType::Ack),
            3 => Ok(MessageType::Rst),
            _ => Err(MessageError::MessageFormat("message type out of range")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Con => "CON",
            MessageType::Non => "NON",
            MessageType::Ack => "ACK",
            MessageType::Rst => "RST",
        }
    }
}

/// Registered Content-Format identifiers (RFC 7252 §12.3).
pub mod content_format {
    pub const TEXT_PLAIN: u16 = 0;
    pub const LINK_FORMAT: u16 = 40;
    pub const XML: u16 = 41;
    pub const OCTET_STREAM: u16 = 42;
    pub const EXI: u16 = 47;
    pub const JSON: u16 = 50;
    pub const CBOR: u16 = 60;
}
