//! Test vector loading infrastructure for the CoAP engine.
//!
//! Each module corresponds to a single JSON file under `.test-vectors/` and
//! provides typed structs matching the JSON schema plus a `load()` function
//! that deserializes the embedded JSON via `include_str!`.
//!
//! # Usage
//!
//! ```rust
//! let vectors = coap_test_vectors::messages::load();
//! for v in &vectors.valid_messages {
//!     assert!(!v.raw.is_empty());
//! }
//! ```

#[cfg(feature = "helpers")]
pub mod helpers;

pub mod blockwise;
pub mod messages;
pub mod options;
pub mod retransmission;

pub use blockwise::BlockwiseVectors;
pub use messages::MessagesVectors;
pub use options::OptionsVectors;
pub use retransmission::RetransmissionVectors;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_messages() {
        let v = messages::load();
        assert!(!v.valid_messages.is_empty());
        assert!(!v.invalid_messages.is_empty());
    }

    #[test]
    fn deserialize_options() {
        let v = options::load();
        assert!(!v.uint_vectors.is_empty());
        assert!(!v.option_stream_vectors.is_empty());
        assert!(!v.invalid_stream_vectors.is_empty());
    }

    #[test]
    fn deserialize_blockwise() {
        let v = blockwise::load();
        assert!(!v.block_values.is_empty());
        assert!(!v.transfer_vectors.is_empty());
    }

    #[test]
    fn deserialize_retransmission() {
        let v = retransmission::load();
        assert_eq!(v.max_retransmit, 4);
        assert!(!v.backoff_vectors.is_empty());
    }
}
