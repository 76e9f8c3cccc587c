//! Option delta/length encoding (RFC 7252 §3.1).
//!
//! Each option starts with one byte holding a 4-bit delta and a 4-bit length
//! nibble. Nibbles 13 and 14 announce a 1- or 2-byte extension, nibble 15 is
//! only legal as part of the `0xFF` payload marker.

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use crate::constants::{
    EXT_8BIT_BASE, EXT_16BIT_BASE, MAX_OPTION_VALUE_SIZE, NIBBLE_EXT_8BIT, NIBBLE_EXT_16BIT,
    NIBBLE_RESERVED, PAYLOAD_MARKER,
};
use crate::error::{MessageError, OptionError};
use crate::option::list::{CoapOption, OptionList};

// ------------------------------------------------------------------ decode

/// Decode options from `bytes` (everything after the token).
///
/// Returns the list and the offset of the first payload byte, which equals
/// `bytes.len()` when no payload marker is present.
pub fn decode(bytes: &[u8]) -> Result<(OptionList, usize), OptionError> {
    let mut list = OptionList::new();
    let mut pos = 0usize;
    let mut last_number = 0u32;

    while pos < bytes.len() {
        let first = bytes[pos];
        if first == PAYLOAD_MARKER {
            if pos + 1 == bytes.len() {
                return Err(OptionError::EmptyPayloadAfterMarker);
            }
            return Ok((list, pos + 1));
        }

        let start = pos;
        pos += 1;
        let delta = read_extended(first >> 4, bytes, &mut pos, start)?;
        let length = read_extended(first & 0x0F, bytes, &mut pos, start)?;

        let number = last_number + delta as u32;
        if number > u32::from(u16::MAX) {
            return Err(OptionError::NumberOverflow);
        }
        let number = number as u16;
        if length > MAX_OPTION_VALUE_SIZE {
            return Err(OptionError::ValueTooLong {
                number,
                len: length,
            });
        }
        let end = pos + length;
        if end > bytes.len() {
            return Err(OptionError::Truncated { offset: start });
        }

        list.push_ordered(CoapOption {
            number,
            value: bytes[pos..end].to_vec(),
        });
        last_number = u32::from(number);
        pos = end;
    }

    Ok((list, bytes.len()))
}

/// Decode a marker-terminated option blob, as used by observer snapshots.
///
/// Unlike [`decode`] the `0xFF` marker is mandatory and may end the input.
/// Returns the list and the number of bytes consumed including the marker.
pub fn decode_blob(bytes: &[u8]) -> Result<(OptionList, usize), OptionError> {
    let end = blob_end(bytes)?;
    let (list, _) = decode(&bytes[..end])?;
    Ok((list, end + 1))
}

/// Offset of the terminating marker, walking option headers without copying.
fn blob_end(bytes: &[u8]) -> Result<usize, OptionError> {
    let mut pos = 0usize;
    loop {
        let first = *bytes.get(pos).ok_or(OptionError::Truncated { offset: pos })?;
        if first == PAYLOAD_MARKER {
            return Ok(pos);
        }
        let start = pos;
        pos += 1;
        read_extended(first >> 4, bytes, &mut pos, start)?;
        let length = read_extended(first & 0x0F, bytes, &mut pos, start)?;
        pos += length;
        if pos > bytes.len() {
            return Err(OptionError::Truncated { offset: start });
        }
    }
}

fn read_extended(
    nibble: u8,
    bytes: &[u8],
    pos: &mut usize,
    start: usize,
) -> Result<usize, OptionError> {
    match nibble {
        NIBBLE_EXT_8BIT => {
            let b = *bytes
                .get(*pos)
                .ok_or(OptionError::Truncated { offset: start })?;
            *pos += 1;
            Ok(usize::from(b) + EXT_8BIT_BASE)
        }
        NIBBLE_EXT_16BIT => {
            let ext = bytes
                .get(*pos..*pos + 2)
                .ok_or(OptionError::Truncated { offset: start })?;
            *pos += 2;
            Ok(usize::from(u16::from_be_bytes([ext[0], ext[1]])) + EXT_16BIT_BASE)
        }
        NIBBLE_RESERVED => Err(OptionError::ReservedNibble { offset: start }),
        n => Ok(usize::from(n)),
    }
}

// ------------------------------------------------------------------ encode

/// Nibble value and number of extension bytes for a delta or length.
fn split_extended(value: usize) -> (u8, usize) {
    if value < EXT_8BIT_BASE {
        (value as u8, 0)
    } else if value < EXT_16BIT_BASE {
        (NIBBLE_EXT_8BIT, 1)
    } else {
        (NIBBLE_EXT_16BIT, 2)
    }
}

fn write_extended(value: usize, ext_len: usize, out: &mut [u8]) {
    match ext_len {
        1 => out[0] = (value - EXT_8BIT_BASE) as u8,
        2 => out[..2].copy_from_slice(&((value - EXT_16BIT_BASE) as u16).to_be_bytes()),
        _ => {}
    }
}

/// Exact number of bytes `encode` produces for `list` (no payload marker).
pub fn encoded_len(list: &OptionList) -> usize {
    let mut last = 0u16;
    let mut total = 0usize;
    for option in list {
        let (_, delta_ext) = split_extended(usize::from(option.number - last));
        let (_, len_ext) = split_extended(option.value.len());
        total += 1 + delta_ext + len_ext + option.value.len();
        last = option.number;
    }
    total
}

/// Write `list` into `out`, returning the number of bytes written.
///
/// The list is expected to be sorted, which `OptionList` guarantees.
pub fn encode_to_slice(list: &OptionList, out: &mut [u8]) -> Result<usize, MessageError> {
    let needed = encoded_len(list);
    if out.len() < needed {
        return Err(MessageError::BufferTooSmall {
            needed,
            actual: out.len(),
        });
    }
    Ok(write_unchecked(list, out))
}

/// Caller guarantees `out.len() >= encoded_len(list)`.
pub(crate) fn write_unchecked(list: &OptionList, out: &mut [u8]) -> usize {
    let mut pos = 0usize;
    let mut last = 0u16;
    for option in list {
        let delta = usize::from(option.number - last);
        let length = option.value.len();
        let (delta_nibble, delta_ext) = split_extended(delta);
        let (len_nibble, len_ext) = split_extended(length);

        out[pos] = (delta_nibble << 4) | len_nibble;
        pos += 1;
        write_extended(delta, delta_ext, &mut out[pos..]);
        pos += delta_ext;
        write_extended(length, len_ext, &mut out[pos..]);
        pos += len_ext;
        out[pos..pos + length].copy_from_slice(&option.value);
        pos += length;
        last = option.number;
    }
    pos
}

/// Encode `list` into a fresh buffer.
pub fn encode(list: &OptionList) -> Vec<u8> {
    let mut out = vec![0u8; encoded_len(list)];
    write_unchecked(list, &mut out);
    out
}

/// Append the encoding of `list` to `out`.
pub fn encode_into(list: &OptionList, out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + encoded_len(list), 0);
    write_unchecked(list, &mut out[start..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::number::{CONTENT_FORMAT, RF_PATH_INFO, SIZE1, URI_PATH};

    #[test]
    fn test_encode_short_delta_and_length() {
        let mut list = OptionList::new();
        list.insert(URI_PATH, b"sensor").unwrap();
        list.insert_uint(CONTENT_FORMAT, 0);

        let bytes = encode(&list);
        assert_eq!(bytes, [&[0xB6][..], b"sensor", &[0x10]].concat());
        assert_eq!(encoded_len(&list), bytes.len());
    }

    #[test]
    fn test_encode_extended_delta() {
        let mut list = OptionList::new();
        list.insert(SIZE1, &[0x05]).unwrap();
        list.insert(RF_PATH_INFO, &[0x02, 0x50]).unwrap();

        // 60 -> 13 + 47; 10000 - 60 = 9940 -> 269 + 9671 (0x25C7)
        let bytes = encode(&list);
        assert_eq!(bytes, vec![0xD1, 0x2F, 0x05, 0xE2, 0x25, 0xC7, 0x02, 0x50]);
    }

    #[test]
    fn test_encode_extended_length() {
        let mut list = OptionList::new();
        let value = vec![0xAAu8; 300];
        list.insert(URI_PATH, &value).unwrap();

        let bytes = encode(&list);
        // length 300 -> 269 + 31
        assert_eq!(&bytes[..3], &[0xBE, 0x00, 0x1F]);
        assert_eq!(bytes.len(), 3 + 300);

        let (decoded, offset) = decode(&bytes).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn test_decode_with_payload_marker() {
        let bytes = [0xB1, b'a', 0xFF, b'h', b'i'];
        let (list, offset) = decode(&bytes).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(offset, 3);
        assert_eq!(&bytes[offset..], b"hi");
    }

    #[test]
    fn test_decode_repeated_options_zero_delta() {
        let bytes = [0xB1, b'a', 0x01, b'b'];
        let (list, _) = decode(&bytes).unwrap();
        assert_eq!(list.uri_path_string(), "/a/b");
    }

    #[test]
    fn test_decode_reserved_nibbles() {
        assert_eq!(
            decode(&[0xF0]),
            Err(OptionError::ReservedNibble { offset: 0 })
        );
        assert_eq!(
            decode(&[0xB1, b'a', 0x0F]),
            Err(OptionError::ReservedNibble { offset: 2 })
        );
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode(&[0xD0]), Err(OptionError::Truncated { offset: 0 }));
        assert_eq!(decode(&[0xE0, 0x01]), Err(OptionError::Truncated { offset: 0 }));
        assert_eq!(decode(&[0x03, 1, 2]), Err(OptionError::Truncated { offset: 0 }));
    }

    #[test]
    fn test_decode_empty_payload_after_marker() {
        assert_eq!(decode(&[0xFF]), Err(OptionError::EmptyPayloadAfterMarker));
        assert_eq!(
            decode(&[0x10, 0xFF]),
            Err(OptionError::EmptyPayloadAfterMarker)
        );
    }

    #[test]
    fn test_decode_number_overflow() {
        // 65535 + 269 in a single delta
        assert_eq!(decode(&[0xE0, 0xFF, 0xFF]), Err(OptionError::NumberOverflow));
        // second option pushes past the limit
        let bytes = [0xE0, 0xFE, 0xF2, 0xE0, 0x00, 0x00];
        assert_eq!(decode(&bytes), Err(OptionError::NumberOverflow));
    }

    #[test]
    fn test_decode_value_too_long() {
        // 269 + 768 = 1037 > 1034
        assert_eq!(
            decode(&[0x0E, 0x03, 0x00]),
            Err(OptionError::ValueTooLong { number: 0, len: 1037 })
        );
    }

    #[test]
    fn test_decode_blob() {
        let list = OptionList::from_uri("temp/in").unwrap();
        let mut blob = encode(&list);
        blob.push(PAYLOAD_MARKER);
        blob.extend_from_slice(&[0x55, 0xAA]);

        let (decoded, consumed) = decode_blob(&blob).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(consumed, blob.len() - 2);

        // empty list is just the marker
        assert_eq!(decode_blob(&[0xFF]).unwrap(), (OptionList::new(), 1));
        // missing marker
        assert_eq!(
            decode_blob(&[0xB1, b'a']),
            Err(OptionError::Truncated { offset: 2 })
        );
    }

    #[test]
    fn test_encode_to_slice_buffer_too_small() {
        let list = OptionList::from_uri("abc").unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(
            encode_to_slice(&list, &mut buf),
            Err(MessageError::BufferTooSmall { needed: 4, actual: 3 })
        );
    }

    #[test]
    fn test_encode_into_appends() {
        let list = OptionList::from_uri("x").unwrap();
        let mut out = vec![0x42];
        encode_into(&list, &mut out);
        assert_eq!(out, vec![0x42, 0xB1, b'x']);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            if let Ok((list, offset)) = decode(&bytes) {
                prop_assert!(list.is_sorted());
                prop_assert!(offset <= bytes.len());
            }
        }

        #[test]
        fn encoded_options_decode_back(
            entries in proptest::collection::vec(
                (0u16..2000, proptest::collection::vec(any::<u8>(), 0..300)),
                0..8,
            )
        ) {
            let mut list = OptionList::new();
            for (number, value) in &entries {
                list.insert(*number, value).unwrap();
            }
            let bytes = encode(&list);
            prop_assert_eq!(bytes.len(), encoded_len(&list));
            let (decoded, offset) = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, list);
            prop_assert_eq!(offset, bytes.len());
        }
    }
}
