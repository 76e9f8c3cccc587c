//! Datagram parsing and serialization (RFC 7252 §3).
//!
//! ```text
//!  0                   1                   2                   3
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! |   Token (if any, TKL bytes) ...
//! |   Options (if any) ...
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! ```

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::constants::{
    COAP_VERSION, HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_TOKEN_LEN, MessageType, PAYLOAD_MARKER,
};
use crate::error::MessageError;
use crate::message::code::Code;
use crate::option::codec;
use crate::option::list::OptionList;
use crate::types::Token;

/// A parsed or to-be-sent CoAP message.
///
/// `timestamp` is host bookkeeping (seconds) and takes no part in equality.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub code: Code,
    pub message_id: u16,
    pub token: Token,
    pub options: OptionList,
    pub payload: Vec<u8>,
    pub timestamp: u64,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.msg_type == other.msg_type
            && self.code == other.code
            && self.message_id == other.message_id
            && self.token == other.token
            && self.options == other.options
            && self.payload == other.payload
    }
}

impl Eq for Message {}

impl Message {
    pub fn new(msg_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            msg_type,
            code,
            message_id,
            token: Token::EMPTY,
            options: OptionList::new(),
            payload: Vec::new(),
            timestamp: 0,
        }
    }

    /// Code-0.00 message: an empty ACK, a RST or a CoAP ping.
    pub fn empty(msg_type: MessageType, message_id: u16) -> Self {
        Self::new(msg_type, Code::EMPTY, message_id)
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn with_options(mut self, options: OptionList) -> Self {
        self.options = options;
        self
    }

    pub fn is_request(&self) -> bool {
        self.code.is_request()
    }

    pub fn is_response(&self) -> bool {
        self.code.is_response()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    // -------------------------------------------------------------- parse

    /// Parse a datagram with the default payload limit.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        Self::parse_with_limit(raw, MAX_PAYLOAD_SIZE)
    }

    /// Parse a datagram, rejecting payloads longer than `max_payload`.
    pub fn parse_with_limit(raw: &[u8], max_payload: usize) -> Result<Self, MessageError> {
        if raw.len() < HEADER_SIZE {
            return Err(MessageError::DatagramTooShort { actual: raw.len() });
        }

        let version = raw[0] >> 6;
        if version != COAP_VERSION {
            return Err(MessageError::UnknownVersion(version));
        }
        let msg_type = MessageType::from_u8((raw[0] >> 4) & 0x03)?;
        let tkl = usize::from(raw[0] & 0x0F);
        if tkl > MAX_TOKEN_LEN {
            return Err(MessageError::MessageFormat("token length above 8"));
        }
        let code = Code(raw[1]);
        if code.is_reserved_class() {
            return Err(MessageError::MessageFormat("reserved code class"));
        }
        let message_id = u16::from_be_bytes([raw[2], raw[3]]);

        if code.is_empty() {
            if tkl != 0 || raw.len() > HEADER_SIZE {
                return Err(MessageError::MessageFormat(
                    "empty message with trailing bytes",
                ));
            }
            return Ok(Self::empty(msg_type, message_id));
        }

        let token_end = HEADER_SIZE + tkl;
        let token_bytes = raw
            .get(HEADER_SIZE..token_end)
            .ok_or(MessageError::MessageFormat("truncated token"))?;
        let token = Token::from_slice(token_bytes)
            .map_err(|_| MessageError::MessageFormat("token length above 8"))?;

        let rest = &raw[token_end..];
        let (options, payload_offset) = codec::decode(rest)?;
        let payload = &rest[payload_offset..];
        if payload.len() > max_payload {
            return Err(MessageError::TooMuchPayload {
                max: max_payload,
                actual: payload.len(),
            });
        }

        Ok(Self {
            msg_type,
            code,
            message_id,
            token,
            options,
            payload: payload.to_vec(),
            timestamp: 0,
        })
    }

    // -------------------------------------------------------------- build

    /// Exact size `build` will produce.
    pub fn sizeof_datagram(&self) -> usize {
        if self.code.is_empty() {
            return HEADER_SIZE;
        }
        let payload = if self.payload.is_empty() {
            0
        } else {
            1 + self.payload.len()
        };
        HEADER_SIZE + self.token.len() + codec::encoded_len(&self.options) + payload
    }

    /// Serialize into a fresh buffer.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.sizeof_datagram()];
        self.write_unchecked(&mut out);
        out
    }

    /// Append the serialized datagram to `out`.
    pub fn build_into(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.sizeof_datagram(), 0);
        self.write_unchecked(&mut out[start..]);
    }

    /// Serialize into a caller buffer without allocating.
    pub fn build_into_slice(&self, buf: &mut [u8]) -> Result<usize, MessageError> {
        let needed = self.sizeof_datagram();
        if buf.len() < needed {
            return Err(MessageError::BufferTooSmall {
                needed,
                actual: buf.len(),
            });
        }
        Ok(self.write_unchecked(buf))
    }

    fn write_unchecked(&self, out: &mut [u8]) -> usize {
        let empty = self.code.is_empty();
        let tkl = if empty { 0 } else { self.token.len() };

        out[0] = (COAP_VERSION << 6) | ((self.msg_type as u8) << 4) | tkl as u8;
        out[1] = self.code.0;
        out[2..4].copy_from_slice(&self.message_id.to_be_bytes());
        if empty {
            return HEADER_SIZE;
        }

        let mut pos = HEADER_SIZE;
        out[pos..pos + tkl].copy_from_slice(self.token.as_slice());
        pos += tkl;
        pos += codec::write_unchecked(&self.options, &mut out[pos..]);
        if !self.payload.is_empty() {
            out[pos] = PAYLOAD_MARKER;
            pos += 1;
            out[pos..pos + self.payload.len()].copy_from_slice(&self.payload);
            pos += self.payload.len();
        }
        pos
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} mid={} token={}",
            self.msg_type.as_str(),
            self.code,
            self.message_id,
            self.token
        )?;
        if self.options.uri_path().next().is_some() {
            write!(f, " path={}", self.options.uri_path_string())?;
        }
        if !self.options.is_empty() {
            write!(f, " opts=[")?;
            for (i, option) in self.options.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", option.number)?;
            }
            write!(f, "]")?;
        }
        write!(f, " payload={}B", self.payload.len())
    }
}
