//! Error types for the coap-core crate.

use core::fmt;

/// Failures while encoding or decoding the option list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionError {
    /// A delta or length nibble of 15 outside the payload marker position.
    ReservedNibble { offset: usize },
    /// An extended delta/length field or an option value runs past the end.
    Truncated { offset: usize },
    /// Option value exceeds `MAX_OPTION_VALUE_SIZE`.
    ValueTooLong { number: u16, len: usize },
    /// Running option number passed 65535.
    NumberOverflow,
    /// `0xFF` marker with nothing after it.
    EmptyPayloadAfterMarker,
    /// Unsigned-integer option value longer than 4 bytes.
    UintTooLong(usize),
}

impl fmt::Display for OptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionError::ReservedNibble { offset } => {
                write!(f, "reserved option nibble 15 at byte {offset}")
            }
            OptionError::Truncated { offset } => {
                write!(f, "option truncated at byte {offset}")
            }
            OptionError::ValueTooLong { number, len } => {
                write!(f, "option {number} value too long: {len} bytes")
            }
            OptionError::NumberOverflow => write!(f, "option number overflow"),
            OptionError::EmptyPayloadAfterMarker => {
                write!(f, "payload marker followed by empty payload")
            }
            OptionError::UintTooLong(len) => {
                write!(f, "uint option value too long: {len} bytes")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OptionError {}

/// Failures while parsing or building a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    DatagramTooShort { actual: usize },
    UnknownVersion(u8),
    MessageFormat(&'static str),
    TooMuchPayload { max: usize, actual: usize },
    Option(OptionError),
    BufferTooSmall { needed: usize, actual: usize },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::DatagramTooShort { actual } => {
                write!(f, "datagram too short: need at least 4 bytes, got {actual}")
            }
            MessageError::UnknownVersion(v) => write!(f, "unknown CoAP version: {v}"),
            MessageError::MessageFormat(reason) => write!(f, "message format error: {reason}"),
            MessageError::TooMuchPayload { max, actual } => {
                write!(f, "payload too large: {actual} bytes (max {max})")
            }
            MessageError::Option(e) => write!(f, "option error: {e}"),
            MessageError::BufferTooSmall { needed, actual } => {
                write!(f, "buffer too small: need {needed} bytes, got {actual}")
            }
        }
    }
}

impl From<OptionError> for MessageError {
    fn from(e: OptionError) -> Self {
        MessageError::Option(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MessageError {}

/// Failures decoding a Block1/Block2 option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// SZX 7 is reserved.
    ReservedSize,
    /// Block number does not fit in 20 bits.
    NumberTooLarge(u32),
    /// Block size is not a power of two in 16..=1024.
    InvalidSize(usize),
    Option(OptionError),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::ReservedSize => write!(f, "reserved block size exponent 7"),
            BlockError::NumberTooLarge(n) => write!(f, "block number too large: {n}"),
            BlockError::InvalidSize(s) => write!(f, "invalid block size: {s}"),
            BlockError::Option(e) => write!(f, "option error: {e}"),
        }
    }
}

impl From<OptionError> for BlockError {
    fn from(e: OptionError) -> Self {
        BlockError::Option(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BlockError {}

/// Token longer than 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTokenLength(pub usize);

impl fmt::Display for InvalidTokenLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid token length: {} (max 8)", self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidTokenLength {}
