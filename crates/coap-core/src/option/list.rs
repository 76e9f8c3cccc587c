//! Ordered option list.
//!
//! Options are kept non-decreasing by number at all times. Insertion scans for
//! the first entry with a larger number and splices in front of it, so repeated
//! numbers (Uri-Path, Uri-Query) keep their insertion order.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use crate::constants::MAX_OPTION_VALUE_SIZE;
use crate::error::OptionError;
use crate::option::number::{self, URI_PATH, URI_QUERY};
use crate::option::uint::{decode_uint, encode_uint};

/// A single option: number plus opaque value bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoapOption {
    pub number: u16,
    pub value: Vec<u8>,
}

impl CoapOption {
    pub fn new(number: u16, value: &[u8]) -> Result<Self, OptionError> {
        if value.len() > MAX_OPTION_VALUE_SIZE {
            return Err(OptionError::ValueTooLong {
                number,
                len: value.len(),
            });
        }
        Ok(Self {
            number,
            value: value.to_vec(),
        })
    }

    /// Interpret the value as an unsigned integer.
    pub fn as_uint(&self) -> Result<u32, OptionError> {
        decode_uint(&self.value)
    }

    /// Interpret the value as UTF-8 text, replacing invalid sequences.
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// Option list sorted by option number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionList {
    options: Vec<CoapOption>,
}

impl OptionList {
    pub fn new() -> Self {
        Self {
            options: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, CoapOption> {
        self.options.iter()
    }

    /// Insert an option after every existing option with a number `<= number`.
    pub fn insert(&mut self, number: u16, value: &[u8]) -> Result<(), OptionError> {
        self.insert_option(CoapOption::new(number, value)?);
        Ok(())
    }

    /// Insert an already validated option, e.g. one copied from another list.
    pub fn insert_option(&mut self, option: CoapOption) {
        let pos = self
            .options
            .iter()
            .position(|o| o.number > option.number)
            .unwrap_or(self.options.len());
        self.options.insert(pos, option);
    }

    /// Insert an unsigned-integer option in minimal big-endian form.
    pub fn insert_uint(&mut self, number: u16, value: u32) {
        self.insert_option(CoapOption {
            number,
            value: encode_uint(value),
        });
    }

    /// Replace every occurrence of `number` with a single uint value.
    pub fn set_uint(&mut self, number: u16, value: u32) {
        self.remove_all(number);
        self.insert_uint(number, value);
    }

    /// Append an option the caller knows is not smaller than the last one.
    ///
    /// Used by the decoder, whose running option number never decreases.
    pub(crate) fn push_ordered(&mut self, option: CoapOption) {
        debug_assert!(self.options.last().is_none_or(|o| o.number <= option.number));
        self.options.push(option);
    }

    /// First option with the given number.
    pub fn get(&self, number: u16) -> Option<&CoapOption> {
        self.options.iter().find(|o| o.number == number)
    }

    /// All options with the given number, in insertion order.
    pub fn get_all(&self, number: u16) -> impl Iterator<Item = &CoapOption> {
        self.options.iter().filter(move |o| o.number == number)
    }

    /// Value of the first option `number` decoded as uint, if present.
    pub fn get_uint(&self, number: u16) -> Result<Option<u32>, OptionError> {
        self.get(number).map(CoapOption::as_uint).transpose()
    }

    pub fn contains(&self, number: u16) -> bool {
        self.get(number).is_some()
    }

    /// Remove every option with the given number. Returns how many were removed.
    pub fn remove_all(&mut self, number: u16) -> usize {
        let before = self.options.len();
        self.options.retain(|o| o.number != number);
        before - self.options.len()
    }

    /// Uri-Path segments in order.
    pub fn uri_path(&self) -> impl Iterator<Item = &[u8]> {
        self.get_all(URI_PATH).map(|o| o.value.as_slice())
    }

    /// Uri-Query entries in order.
    pub fn uri_query(&self) -> impl Iterator<Item = &[u8]> {
        self.get_all(URI_QUERY).map(|o| o.value.as_slice())
    }

    /// True if both lists carry the same Uri-Path sequence. Other options are ignored.
    pub fn uri_path_eq(&self, other: &OptionList) -> bool {
        self.uri_path().eq(other.uri_path())
    }

    /// Render the Uri-Path as `/a/b` (`/` for an empty path).
    pub fn uri_path_string(&self) -> String {
        let mut out = String::new();
        for segment in self.uri_path() {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(segment));
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    /// Append Uri-Path and Uri-Query options parsed from `"a/b?x=1&y"`.
    ///
    /// A leading `/` is optional and empty segments are skipped.
    pub fn add_uri(&mut self, uri: &str) -> Result<(), OptionError> {
        let (path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (uri, None),
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.insert(URI_PATH, segment.as_bytes())?;
        }
        if let Some(query) = query {
            for entry in query.split('&').filter(|s| !s.is_empty()) {
                self.insert(URI_QUERY, entry.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Build a list holding only the Uri-Path/Uri-Query of `uri`.
    pub fn from_uri(uri: &str) -> Result<Self, OptionError> {
        let mut list = Self::new();
        list.add_uri(uri)?;
        Ok(list)
    }

    /// First critical option number this stack does not understand.
    pub fn find_unknown_critical(&self) -> Option<u16> {
        self.options
            .iter()
            .map(|o| o.number)
            .find(|&n| number::is_critical(n) && !number::is_known(n))
    }

    /// Check the ordering invariant.
    pub fn is_sorted(&self) -> bool {
        self.options.windows(2).all(|w| w[0].number <= w[1].number)
    }
}

impl<'a> IntoIterator for &'a OptionList {
    type Item = &'a CoapOption;
    type IntoIter = core::slice::Iter<'a, CoapOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option::number::{CONTENT_FORMAT, ETAG, OBSERVE};

    fn numbers(list: &OptionList) -> Vec<u16> {
        list.iter().map(|o| o.number).collect()
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut list = OptionList::new();
        list.insert(URI_QUERY, b"q").unwrap();
        list.insert(OBSERVE, b"").unwrap();
        list.insert(URI_PATH, b"a").unwrap();
        list.insert(CONTENT_FORMAT, &[0]).unwrap();
        assert_eq!(numbers(&list), vec![OBSERVE, URI_PATH, CONTENT_FORMAT, URI_QUERY]);
        assert!(list.is_sorted());
    }

    #[test]
    fn test_insert_ties_preserve_insertion_order() {
        let mut list = OptionList::new();
        list.insert(URI_PATH, b"first").unwrap();
        list.insert(URI_QUERY, b"x=1").unwrap();
        list.insert(URI_PATH, b"second").unwrap();
        list.insert(ETAG, b"e").unwrap();
        list.insert(URI_PATH, b"third").unwrap();

        let path: Vec<&[u8]> = list.uri_path().collect();
        assert_eq!(path, vec![&b"first"[..], b"second", b"third"]);
        assert_eq!(numbers(&list), vec![ETAG, URI_PATH, URI_PATH, URI_PATH, URI_QUERY]);
    }

    #[test]
    fn test_insert_rejects_oversized_value() {
        let mut list = OptionList::new();
        let big = vec![0u8; MAX_OPTION_VALUE_SIZE + 1];
        assert_eq!(
            list.insert(URI_PATH, &big),
            Err(OptionError::ValueTooLong {
                number: URI_PATH,
                len: MAX_OPTION_VALUE_SIZE + 1
            })
        );
        assert!(list.is_empty());
        assert!(list.insert(URI_PATH, &big[..MAX_OPTION_VALUE_SIZE]).is_ok());
    }

    #[test]
    fn test_uint_helpers() {
        let mut list = OptionList::new();
        list.insert_uint(OBSERVE, 7);
        assert_eq!(list.get_uint(OBSERVE).unwrap(), Some(7));
        list.set_uint(OBSERVE, 0x1234);
        assert_eq!(list.get_all(OBSERVE).count(), 1);
        assert_eq!(list.get(OBSERVE).unwrap().value, vec![0x12, 0x34]);
        assert_eq!(list.get_uint(CONTENT_FORMAT).unwrap(), None);
    }

    #[test]
    fn test_add_uri_path_and_query() {
        let list = OptionList::from_uri("/sensors/temp?unit=c&fast").unwrap();
        assert_eq!(list.uri_path_string(), "/sensors/temp");
        let query: Vec<&[u8]> = list.uri_query().collect();
        assert_eq!(query, vec![&b"unit=c"[..], b"fast"]);
    }

    #[test]
    fn test_uri_root_and_empty_segments() {
        let root = OptionList::from_uri("/").unwrap();
        assert!(root.is_empty());
        assert_eq!(root.uri_path_string(), "/");

        let list = OptionList::from_uri("a//b/").unwrap();
        assert_eq!(list.uri_path_string(), "/a/b");
    }

    #[test]
    fn test_uri_path_eq_ignores_other_options() {
        let mut a = OptionList::from_uri("a/b").unwrap();
        a.insert_uint(OBSERVE, 0);
        a.insert(URI_QUERY, b"x").unwrap();
        let b = OptionList::from_uri("a/b").unwrap();
        let c = OptionList::from_uri("a/c").unwrap();
        let d = OptionList::from_uri("a").unwrap();

        assert!(a.uri_path_eq(&b));
        assert!(!a.uri_path_eq(&c));
        assert!(!a.uri_path_eq(&d));
        assert!(OptionList::new().uri_path_eq(&OptionList::from_uri("?q=1").unwrap()));
    }

    #[test]
    fn test_find_unknown_critical() {
        let mut list = OptionList::from_uri("a").unwrap();
        assert_eq!(list.find_unknown_critical(), None);
        // 2 is unknown but elective
        list.insert(2, b"").unwrap();
        assert_eq!(list.find_unknown_critical(), None);
        list.insert(9, b"").unwrap();
        list.insert(21, b"").unwrap();
        assert_eq!(list.find_unknown_critical(), Some(9));
    }

    #[test]
    fn test_remove_all() {
        let mut list = OptionList::from_uri("a/b?c").unwrap();
        assert_eq!(list.remove_all(URI_PATH), 2);
        assert_eq!(list.len(), 1);
        assert_eq!(list.remove_all(URI_PATH), 0);
    }
}
