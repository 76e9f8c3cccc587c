//! Observer snapshot codec.
//!
//! Each record is
//!
//! ```text
//! 0x55 0xAA | socket u32 BE | family (4|6) | address | port u16 BE
//!           | token len | token | options ... | 0xFF
//! ```
//!
//! The option blob holds the resource's Uri-Path followed by the observer's
//! extra options, in normal option encoding.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use coap_core::constants::PAYLOAD_MARKER;
use coap_core::option::number::URI_PATH;
use coap_core::option::{self, OptionList};
use coap_core::types::Token;

use crate::error::PersistError;
use crate::transport::SocketHandle;

pub const RECORD_MAGIC: [u8; 2] = [0x55, 0xAA];

const FAMILY_V4: u8 = 4;
const FAMILY_V6: u8 = 6;

/// An observer as stored on disk, detached from any resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObserver {
    pub socket: SocketHandle,
    pub remote: SocketAddr,
    pub token: Token,
    /// Uri-Path of the observed resource.
    pub uri: OptionList,
    pub extra_options: OptionList,
}

pub fn encode_observers(records: &[StoredObserver]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        encode_record(record, &mut out);
    }
    out
}

pub fn encode_record(record: &StoredObserver, out: &mut Vec<u8>) {
    out.extend_from_slice(&RECORD_MAGIC);
    out.extend_from_slice(&record.socket.0.to_be_bytes());
    match record.remote.ip() {
        IpAddr::V4(ip) => {
            out.push(FAMILY_V4);
            out.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            out.push(FAMILY_V6);
            out.extend_from_slice(&ip.octets());
        }
    }
    out.extend_from_slice(&record.remote.port().to_be_bytes());
    out.push(record.token.len() as u8);
    out.extend_from_slice(record.token.as_slice());

    let mut blob = OptionList::new();
    for opt in record.uri.iter().filter(|o| o.number == URI_PATH) {
        blob.insert_option(opt.clone());
    }
    for opt in record.extra_options.iter() {
        blob.insert_option(opt.clone());
    }
    option::encode_into(&blob, out);
    out.push(PAYLOAD_MARKER);
}

pub fn decode_observers(bytes: &[u8]) -> Result<Vec<StoredObserver>, PersistError> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let (record, consumed) = decode_record(&bytes[offset..], offset)?;
        records.push(record);
        offset += consumed;
    }
    Ok(records)
}

/// Decode one record from the start of `bytes`; `base` is only used for error offsets.
fn decode_record(bytes: &[u8], base: usize) -> Result<(StoredObserver, usize), PersistError> {
    let mut reader = Reader { bytes, pos: 0, base };

    if reader.take(2)? != RECORD_MAGIC {
        return Err(PersistError::BadMagic { offset: base });
    }
    let socket = SocketHandle(u32::from_be_bytes(reader.array::<4>()?));
    let ip = match reader.byte()? {
        FAMILY_V4 => IpAddr::V4(Ipv4Addr::from(reader.array::<4>()?)),
        FAMILY_V6 => IpAddr::V6(Ipv6Addr::from(reader.array::<16>()?)),
        other => return Err(PersistError::UnknownFamily(other)),
    };
    let port = u16::from_be_bytes(reader.array::<2>()?);
    let token_len = usize::from(reader.byte()?);
    let token = Token::from_slice(reader.take(token_len)?)?;

    let (blob, consumed) = option::decode_blob(&bytes[reader.pos..])?;
    reader.pos += consumed;

    let mut uri = OptionList::new();
    let mut extra_options = OptionList::new();
    for opt in blob.iter() {
        if opt.number == URI_PATH {
            uri.insert_option(opt.clone());
        } else {
            extra_options.insert_option(opt.clone());
        }
    }

    Ok((
        StoredObserver {
            socket,
            remote: SocketAddr::new(ip, port),
            token,
            uri,
            extra_options,
        },
        reader.pos,
    ))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], PersistError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(PersistError::Truncated {
                offset: self.base + self.pos,
            })?;
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, PersistError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], PersistError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coap_core::option::number::URI_QUERY;

    fn record(remote: &str, token: &[u8], path: &str) -> StoredObserver {
        let mut extra = OptionList::new();
        extra.insert(URI_QUERY, b"unit=c").unwrap();
        StoredObserver {
            socket: SocketHandle(2),
            remote: remote.parse().unwrap(),
            token: Token::from_slice(token).unwrap(),
            uri: OptionList::from_uri(path).unwrap(),
            extra_options: extra,
        }
    }

    #[test]
    fn test_record_layout_v4() {
        let mut r = record("10.0.0.7:5683", &[0xAB], "t");
        r.extra_options = OptionList::new();
        let bytes = encode_observers(&[r]);
        assert_eq!(
            bytes,
            vec![
                0x55, 0xAA, // magic
                0, 0, 0, 2, // socket
                4, 10, 0, 0, 7, 0x16, 0x33, // endpoint
                1, 0xAB, // token
                0xB1, b't', // Uri-Path
                0xFF,
            ]
        );
    }

    #[test]
    fn test_records_decode_back() {
        let records = vec![
            record("10.0.0.7:5683", &[1, 2, 3], "sensors/temp"),
            record("[fe80::1]:61616", &[], ""),
        ];
        let bytes = encode_observers(&records);
        assert_eq!(decode_observers(&bytes).unwrap(), records);
        assert!(decode_observers(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_magic_reports_offset() {
        let mut bytes = encode_observers(&[record("10.0.0.7:5683", &[1], "a")]);
        let second = bytes.len();
        bytes.extend_from_slice(&[0x55, 0xAB]);
        assert_eq!(
            decode_observers(&bytes),
            Err(PersistError::BadMagic { offset: second })
        );
    }

    #[test]
    fn test_truncated_and_unknown_family() {
        let bytes = encode_observers(&[record("10.0.0.7:5683", &[1], "a")]);
        assert!(matches!(
            decode_observers(&bytes[..5]),
            Err(PersistError::Truncated { offset: 2 })
        ));
        // missing terminating marker
        assert!(matches!(
            decode_observers(&bytes[..bytes.len() - 1]),
            Err(PersistError::Option(_))
        ));

        let mut bad = bytes.clone();
        bad[6] = 5;
        assert_eq!(decode_observers(&bad), Err(PersistError::UnknownFamily(5)));
    }

    #[test]
    fn test_token_too_long() {
        let mut bytes = encode_observers(&[record("10.0.0.7:5683", &[], "a")]);
        // token length byte follows the 13-byte prefix
        bytes[13] = 9;
        bytes.splice(14..14, [0u8; 9]);
        assert!(matches!(decode_observers(&bytes), Err(PersistError::Token(_))));
    }
}
