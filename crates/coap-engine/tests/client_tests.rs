//! Client-role exchanges against a scripted peer.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use coap_core::constants::MessageType;
use coap_core::message::{Code, Message};
use coap_engine::{EngineConfig, EngineError, Handle, SocketHandle};

use common::{Harness, peer, request, test_config, token};

type Outcomes = Arc<Mutex<Vec<Result<Message, EngineError>>>>;

/// Start `msg` towards `peer()`; the returned list collects callback results.
fn start(h: &mut Harness, msg: Message) -> (Handle, Outcomes) {
    let outcomes: Outcomes = Arc::default();
    let sink = outcomes.clone();
    let handle = h
        .engine
        .start_request(h.socket, peer(), msg, move |result: Result<&Message, EngineError>, _: SocketAddr| {
            sink.lock().unwrap().push(result.cloned());
        })
        .unwrap();
    (handle, outcomes)
}

fn get(msg_type: MessageType) -> Message {
    request(msg_type, Code::GET, "sensor", 0, &[0xC1])
}

fn outcomes(list: &Outcomes) -> Vec<Result<Message, EngineError>> {
    list.lock().unwrap().clone()
}

#[test]
fn piggybacked_response_reaches_callback() {
    let mut h = Harness::new();
    let (_, results) = start(&mut h, get(MessageType::Con));
    h.run();

    let sent = h.take_sent();
    assert_eq!(sent.len(), 1);
    let req = &sent[0];
    assert_eq!(req.msg_type, MessageType::Con);
    assert_eq!(req.token, token(&[0xC1]));

    let reply = Message::new(MessageType::Ack, Code::CONTENT, req.message_id)
        .with_token(req.token)
        .with_payload(b"23.5");
    h.deliver(&reply).unwrap();
    h.run();

    let got = outcomes(&results);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].as_ref().unwrap().payload, b"23.5");
    assert_eq!(h.engine.interaction_count(), 0);
}

#[test]
fn separate_response_is_acknowledged() {
    let mut h = Harness::new();
    let (_, results) = start(&mut h, get(MessageType::Con));
    h.run();
    let req = h.take_sent().remove(0);

    h.deliver(&Message::empty(MessageType::Ack, req.message_id)).unwrap();
    h.advance_secs(20);
    assert!(h.take_sent().is_empty(), "acknowledged request must not be retransmitted");
    assert!(outcomes(&results).is_empty());

    let separate = Message::new(MessageType::Con, Code::CONTENT, 0x9000)
        .with_token(req.token)
        .with_payload(b"late");
    h.deliver(&separate).unwrap();
    h.run();

    assert_eq!(h.take_sent(), vec![Message::empty(MessageType::Ack, 0x9000)]);
    let got = outcomes(&results);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].as_ref().unwrap().payload, b"late");
}

#[test]
fn unmatched_response_is_reset() {
    let mut h = Harness::new();
    for msg_type in [MessageType::Con, MessageType::Non] {
        let stray = Message::new(msg_type, Code::CONTENT, 0x4242).with_token(token(&[9, 9]));
        assert!(matches!(h.deliver(&stray), Err(EngineError::NotFound(_))));
        assert_eq!(h.take_sent(), vec![Message::empty(MessageType::Rst, 0x4242)]);
    }
}

#[test]
fn non_request_times_out() {
    let mut h = Harness::new();
    let (_, results) = start(&mut h, get(MessageType::Non));
    h.run();
    assert_eq!(h.take_sent()[0].msg_type, MessageType::Non);

    h.advance_secs(45);
    assert!(outcomes(&results).is_empty());
    h.advance_secs(1);

    assert_eq!(outcomes(&results), vec![Err(EngineError::Timeout)]);
    assert!(h.take_sent().is_empty());
    assert_eq!(h.engine.interaction_count(), 0);
}

#[test]
fn reset_ends_request() {
    let mut h = Harness::new();
    let (_, results) = start(&mut h, get(MessageType::Con));
    h.run();
    let mid = h.take_sent()[0].message_id;

    h.deliver(&Message::empty(MessageType::Rst, mid)).unwrap();
    h.run();
    assert_eq!(outcomes(&results), vec![Err(EngineError::RemoteReset)]);
}

#[test]
fn retransmissions_follow_backoff_vectors() {
    let vectors = coap_test_vectors::retransmission::load();
    for v in vectors.backoff_vectors.iter().filter(|v| v.base_timeout_ms % 1000 == 0) {
        let mut h = Harness::with_config(EngineConfig {
            ack_timeout_secs: v.base_timeout_ms / 1000,
            max_retransmit: vectors.max_retransmit,
            ..test_config()
        });
        let (_, results) = start(&mut h, get(MessageType::Con));
        h.run();
        let original = h.take_sent().remove(0);

        for (i, interval) in v.retransmit_deadlines_ms.iter().enumerate() {
            h.advance_ms(interval - 1);
            assert!(h.take_sent().is_empty(), "{}: early resend {i}", v.description);
            h.advance_ms(1);
            assert_eq!(h.take_sent(), vec![original.clone()], "{}: resend {i}", v.description);
        }

        h.advance_ms(v.give_up_after_ms - 1);
        assert!(outcomes(&results).is_empty(), "{}", v.description);
        h.advance_ms(1);
        assert_eq!(outcomes(&results), vec![Err(EngineError::OutOfAttempts)], "{}", v.description);
        assert!(h.take_sent().is_empty());
    }
}

#[test]
fn cancelled_request_never_calls_back() {
    let mut h = Harness::new();
    let (handle, results) = start(&mut h, get(MessageType::Con));
    h.run();
    h.take_sent();

    h.engine.cancel(handle).unwrap();
    for _ in 0..10 {
        h.advance_secs(10);
    }
    assert!(outcomes(&results).is_empty());
    assert!(h.take_sent().is_empty());
    assert_eq!(h.engine.cancel(handle), Err(EngineError::NotFound("interaction")));
}

#[test]
fn empty_token_is_generated() {
    let mut h = Harness::new();
    start(&mut h, request(MessageType::Con, Code::GET, "sensor", 0, &[]));
    h.run();
    assert_eq!(h.take_sent()[0].token.len(), 8);
}

#[test]
fn transport_failure_reaches_callback() {
    let mut h = Harness::new();
    h.wire.set_failing(true);
    let (_, results) = start(&mut h, get(MessageType::Con));
    h.run();

    let got = outcomes(&results);
    assert_eq!(got.len(), 1);
    assert!(matches!(got[0], Err(EngineError::Network(_))));
    assert_eq!(h.engine.interaction_count(), 0);
}

#[test]
fn invalid_requests_are_refused() {
    let mut h = Harness::new();
    let noop = |_: Result<&Message, EngineError>, _: SocketAddr| {};

    let response = Message::new(MessageType::Con, Code::CONTENT, 0);
    assert!(matches!(
        h.engine.start_request(h.socket, peer(), response, noop),
        Err(EngineError::Argument(_))
    ));
    assert!(matches!(
        h.engine.start_request(h.socket, peer(), get(MessageType::Ack), noop),
        Err(EngineError::Argument(_))
    ));
    assert!(matches!(
        h.engine.start_request(SocketHandle(77), peer(), get(MessageType::Con), noop),
        Err(EngineError::Socket(SocketHandle(77)))
    ));
}
