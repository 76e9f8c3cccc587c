//! Test vector types for retransmission.json
//!
//! CON retransmission deadlines for a fixed initial timeout: the timeout
//! doubles after every retransmission and the exchange gives up after
//! `max_retransmit` retransmissions.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct BackoffVector {
    pub description: String,
    pub base_timeout_ms: u64,
    pub retransmit_deadlines_ms: Vec<u64>,
    pub give_up_after_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RetransmissionVectors {
    pub ack_timeout_ms: u64,
    pub ack_random_factor_permille: u64,
    pub max_retransmit: u32,
    pub backoff_vectors: Vec<BackoffVector>,
}

pub fn load() -> RetransmissionVectors {
    let json = include_str!("../../../.test-vectors/retransmission.json");
    serde_json::from_str(json).expect("Failed to deserialize retransmission.json")
}
