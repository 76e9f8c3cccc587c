//! Newtype wrappers for CoAP header fields.

use core::fmt;

use crate::constants::MAX_TOKEN_LEN;
use crate::error::InvalidTokenLength;

/// Helper to write lowercase hex without the `hex` crate.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Client-chosen request/response correlator, 0 to 8 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[must_use]
pub struct Token {
    len: u8,
    bytes: [u8; MAX_TOKEN_LEN],
}

impl Token {
    /// The zero-length token.
    pub const EMPTY: Token = Token {
        len: 0,
        bytes: [0; MAX_TOKEN_LEN],
    };

    pub fn from_slice(bytes: &[u8]) -> Result<Self, InvalidTokenLength> {
        if bytes.len() > MAX_TOKEN_LEN {
            return Err(InvalidTokenLength(bytes.len()));
        }
        let mut token = Token::EMPTY;
        token.bytes[..bytes.len()].copy_from_slice(bytes);
        token.len = bytes.len() as u8;
        Ok(token)
    }

    /// Build a full-length token from a 64-bit value (big-endian).
    pub fn from_u64(value: u64) -> Self {
        Token {
            len: MAX_TOKEN_LEN as u8,
            bytes: value.to_be_bytes(),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for Token {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl TryFrom<&[u8]> for Token {
    type Error = InvalidTokenLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Token::from_slice(bytes)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        fmt_hex(self.as_slice(), f)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(")?;
        fmt_hex(self.as_slice(), f)?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_slice() {
        let t = Token::from_slice(&[0x44, 0x55]).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.as_slice(), &[0x44, 0x55]);
        assert!(!t.is_empty());
    }

    #[test]
    fn test_token_too_long() {
        let err = Token::from_slice(&[0u8; 9]).unwrap_err();
        assert_eq!(err, InvalidTokenLength(9));
    }

    #[test]
    fn test_token_equality_ignores_unused_bytes() {
        let a = Token::from_slice(&[1, 2]).unwrap();
        let b = Token::try_from(&[1u8, 2][..]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Token::from_slice(&[1, 2, 0]).unwrap());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(Token::EMPTY.to_string(), "-");
        assert_eq!(Token::from_slice(&[0xab, 0x01]).unwrap().to_string(), "ab01");
        assert_eq!(format!("{:?}", Token::from_u64(1)), "Token(0000000000000001)");
    }
}
