//! Test vector types for blockwise.json
//!
//! Block option value packing and server-side Block2 slicing decisions.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BlockValueVector {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
    pub size: usize,
    pub encoded: u32,
}

#[derive(Debug, Deserialize)]
pub struct RequestedBlock {
    pub num: u32,
    pub szx: u8,
}

#[derive(Debug, Deserialize)]
pub struct ExpectedBlock {
    pub num: u32,
    pub more: bool,
    pub szx: u8,
}

#[derive(Debug, Deserialize)]
pub struct TransferVector {
    pub description: String,
    pub body_len: usize,
    pub max_chunk: usize,
    pub request_block: Option<RequestedBlock>,
    pub expect_block: Option<ExpectedBlock>,
    pub expect_offset: usize,
    pub expect_len: usize,
    pub expect_bad_option: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlockwiseVectors {
    pub block_values: Vec<BlockValueVector>,
    pub transfer_vectors: Vec<TransferVector>,
}

pub fn load() -> BlockwiseVectors {
    let json = include_str!("../../../.test-vectors/blockwise.json");
    serde_json::from_str(json).expect("Failed to deserialize blockwise.json")
}
