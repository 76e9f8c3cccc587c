//! Shared engine harness: recording transport, manual clock, one socket.
#![allow(dead_code)]

use std::net::SocketAddr;

use coap_core::constants::MessageType;
use coap_core::message::{Code, Message};
use coap_core::option::OptionList;
use coap_core::types::Token;
use coap_engine::testing::RecordingTransport;
use coap_engine::{CoapEngine, EngineConfig, EngineError, ManualClock, MetaInfo, NetPacket, SocketHandle};

pub const START_MS: u64 = 100_000;

pub struct Harness {
    pub engine: CoapEngine<RecordingTransport, ManualClock>,
    pub wire: RecordingTransport,
    pub clock: ManualClock,
    pub socket: SocketHandle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let wire = RecordingTransport::new();
        let clock = ManualClock::new(START_MS);
        let mut engine = CoapEngine::new(config, wire.clone(), clock.clone());
        let socket = engine.new_socket();
        Self {
            engine,
            wire,
            clock,
            socket,
        }
    }

    pub fn deliver(&mut self, message: &Message) -> Result<(), EngineError> {
        self.deliver_from(peer(), message, MetaInfo::None)
    }

    pub fn deliver_from(&mut self, remote: SocketAddr, message: &Message, meta: MetaInfo) -> Result<(), EngineError> {
        let packet = NetPacket::new(message.build(), remote).with_meta(meta);
        self.engine.handle_incoming_packet(self.socket, packet)
    }

    /// Run the work loop until nothing is ready at the current time.
    pub fn run(&mut self) {
        for _ in 0..100 {
            if self.engine.run_pending() == 0 {
                return;
            }
        }
        panic!("work loop did not settle");
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.clock.advance_secs(secs);
        self.run();
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        self.run();
    }

    /// Messages sent since the last call.
    pub fn take_sent(&self) -> Vec<Message> {
        self.wire.drain().expect("engine sent a malformed datagram")
    }
}

/// Defaults with a fixed seed and no timeout randomization.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        ack_random_factor_permille: 1000,
        rng_seed: Some(42),
        ..EngineConfig::default()
    }
}

pub fn peer() -> SocketAddr {
    "192.0.2.10:5683".parse().unwrap()
}

pub fn other_peer() -> SocketAddr {
    "192.0.2.11:5683".parse().unwrap()
}

pub fn token(bytes: &[u8]) -> Token {
    Token::from_slice(bytes).unwrap()
}

pub fn request(msg_type: MessageType, code: Code, path: &str, mid: u16, tok: &[u8]) -> Message {
    Message::new(msg_type, code, mid)
        .with_token(token(tok))
        .with_options(OptionList::from_uri(path).unwrap())
}

pub fn con_get(path: &str, mid: u16, tok: &[u8]) -> Message {
    request(MessageType::Con, Code::GET, path, mid, tok)
}
