//! Test vector types for messages.json
//!
//! Complete datagrams with their decoded header fields, plus malformed
//! datagrams tagged with the error kind the parser must report.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct OptionEntry {
    pub number: u16,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidMessageVector {
    pub description: String,
    pub raw: String,
    pub msg_type: String,
    pub code: String,
    pub message_id: u16,
    pub token: String,
    pub options: Vec<OptionEntry>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct InvalidMessageVector {
    pub description: String,
    pub raw: String,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesVectors {
    pub valid_messages: Vec<ValidMessageVector>,
    pub invalid_messages: Vec<InvalidMessageVector>,
}

pub fn load() -> MessagesVectors {
    let json = include_str!("../../../.test-vectors/messages.json");
    serde_json::from_str(json).expect("Failed to deserialize messages.json")
}
