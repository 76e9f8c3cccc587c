//! Unsigned-integer option values (RFC 7252 §3.2).
//!
//! Values are written big-endian in the fewest bytes possible: zero is the
//! empty string, otherwise 1 to 4 bytes with no leading zero byte.

extern crate alloc;
use alloc::vec::Vec;

use crate::error::OptionError;

/// Encode `value` as a minimal-length big-endian byte string.
#[must_use]
pub fn encode_uint(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    bytes[skip..].to_vec()
}

/// Decode a 0..=4 byte big-endian value. Leading zeros are tolerated.
pub fn decode_uint(bytes: &[u8]) -> Result<u32, OptionError> {
    if bytes.len() > 4 {
        return Err(OptionError::UintTooLong(bytes.len()));
    }
    Ok(bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_minimal_length() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(1), vec![0x01]);
        assert_eq!(encode_uint(0xFF), vec![0xFF]);
        assert_eq!(encode_uint(0x100), vec![0x01, 0x00]);
        assert_eq!(encode_uint(0x0001_0203), vec![0x01, 0x02, 0x03]);
        assert_eq!(encode_uint(u32::MAX), vec![0xFF; 4]);
    }

    #[test]
    fn test_decode_big_endian() {
        assert_eq!(decode_uint(&[]).unwrap(), 0);
        assert_eq!(decode_uint(&[0x01, 0x00]).unwrap(), 256);
        assert_eq!(decode_uint(&[0x00, 0x00, 0x2A]).unwrap(), 42);
    }

    #[test]
    fn test_decode_too_long() {
        assert_eq!(
            decode_uint(&[1, 2, 3, 4, 5]),
            Err(OptionError::UintTooLong(5))
        );
    }
}
