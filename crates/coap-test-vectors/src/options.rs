//! Test vector types for options.json
//!
//! Unsigned-integer option values, encoded option streams around the
//! delta/length extension boundaries, and malformed streams.

use serde::Deserialize;

pub use crate::messages::OptionEntry;

#[derive(Debug, Deserialize)]
pub struct UintVector {
    pub value: u32,
    pub encoded: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionStreamVector {
    pub description: String,
    pub options: Vec<OptionEntry>,
    pub encoded: String,
}

#[derive(Debug, Deserialize)]
pub struct InvalidStreamVector {
    pub description: String,
    pub raw: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct OptionsVectors {
    pub uint_vectors: Vec<UintVector>,
    pub option_stream_vectors: Vec<OptionStreamVector>,
    pub invalid_stream_vectors: Vec<InvalidStreamVector>,
}

pub fn load() -> OptionsVectors {
    let json = include_str!("../../../.test-vectors/options.json");
    serde_json::from_str(json).expect("Failed to deserialize options.json")
}
