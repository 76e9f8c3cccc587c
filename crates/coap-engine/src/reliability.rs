//! CON retransmission and hold-time decisions (RFC 7252 §4.2, §4.8).
//!
//! Everything here is a pure function of the interaction's timing state so
//! the role handlers only act on the returned [`Progress`].

use coap_core::constants::MessageType;
use rand::Rng;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::interaction::Confirm;

/// Polling outcome for an in-flight exchange. Never leaves the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for an ACK or a separate response.
    Waiting,
    /// Exchange is complete but kept around to answer duplicates.
    HoldingBack,
    /// ACK deadline passed; resend the same message.
    Retry,
    /// Exchange finished successfully.
    Done,
}

// ======================================================================== //
// Timeouts
// ======================================================================== //

/// Random initial timeout in `[ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR]`.
pub fn initial_timeout_ms(config: &EngineConfig, rng: &mut impl Rng) -> u64 {
    let low = config.ack_timeout_ms();
    let high = config.max_initial_timeout_ms().max(low);
    rng.gen_range(low..=high)
}

/// Deadline for the ACK of transmission number `retrans_counter` (0 = first send).
///
/// The timeout doubles with every retransmission.
pub fn ack_deadline_ms(now_ms: u64, base_timeout_ms: u64, retrans_counter: u32) -> u64 {
    let factor = 1u64.checked_shl(retrans_counter).unwrap_or(u64::MAX);
    now_ms.saturating_add(base_timeout_ms.saturating_mul(factor))
}

/// True once more than `span_secs` have passed since `timestamp_secs`.
pub fn is_older_than(timestamp_secs: u64, span_secs: u64, now_secs: u64) -> bool {
    now_secs > timestamp_secs.saturating_add(span_secs)
}

// ======================================================================== //
// Status checks
// ======================================================================== //

/// Timing state of a message we sent and are tracking.
#[derive(Debug, Clone, Copy)]
pub struct SentState {
    pub msg_type: MessageType,
    pub confirm: Confirm,
    pub sent_at_secs: u64,
    pub ack_deadline_ms: u64,
    pub retrans_counter: u32,
}

fn con_timeout_progress(sent: &SentState, now_ms: u64, max_retransmit: u32) -> Result<Progress, EngineError> {
    if now_ms >= sent.ack_deadline_ms {
        if sent.retrans_counter >= max_retransmit {
            return Err(EngineError::OutOfAttempts);
        }
        return Ok(Progress::Retry);
    }
    Ok(Progress::Waiting)
}

/// Progress of a response or notification we sent (server side).
///
/// NON and ACK responses are held for `hold_secs` to answer duplicates; a CON
/// response is done once acknowledged.
pub fn response_progress(
    sent: &SentState,
    now_ms: u64,
    max_retransmit: u32,
    hold_secs: u64,
) -> Result<Progress, EngineError> {
    if sent.confirm == Confirm::Reset {
        return Err(EngineError::RemoteReset);
    }
    match sent.msg_type {
        MessageType::Non | MessageType::Ack => {
            if is_older_than(sent.sent_at_secs, hold_secs, now_ms / 1000) {
                Ok(Progress::Done)
            } else {
                Ok(Progress::HoldingBack)
            }
        }
        MessageType::Con => {
            if sent.confirm == Confirm::Acked {
                return Ok(Progress::Done);
            }
            con_timeout_progress(sent, now_ms, max_retransmit)
        }
        MessageType::Rst => Err(EngineError::Argument("RST is never tracked as a response")),
    }
}

/// Progress of a request we sent (client side).
///
/// Once a CON request is acknowledged, or for NON requests, the client waits
/// up to `max_wait_secs` for the separate response.
pub fn request_progress(
    sent: &SentState,
    now_ms: u64,
    max_retransmit: u32,
    max_wait_secs: u64,
) -> Result<Progress, EngineError> {
    if sent.confirm == Confirm::Reset {
        return Err(EngineError::RemoteReset);
    }
    let waited_too_long = is_older_than(sent.sent_at_secs, max_wait_secs, now_ms / 1000);
    match sent.msg_type {
        MessageType::Con if sent.confirm != Confirm::Acked => {
            con_timeout_progress(sent, now_ms, max_retransmit)
        }
        _ if waited_too_long => Err(EngineError::Timeout),
        _ => Ok(Progress::Waiting),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn con(confirm: Confirm, deadline: u64, retrans: u32) -> SentState {
        SentState {
            msg_type: MessageType::Con,
            confirm,
            sent_at_secs: 0,
            ack_deadline_ms: deadline,
            retrans_counter: retrans,
        }
    }

    #[test]
    fn test_initial_timeout_range() {
        let config = EngineConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let t = initial_timeout_ms(&config, &mut rng);
            assert!((2000..=3000).contains(&t), "timeout {t} out of range");
        }
    }

    #[test]
    fn test_deadline_doubles() {
        assert_eq!(ack_deadline_ms(100, 2000, 0), 2100);
        assert_eq!(ack_deadline_ms(100, 2000, 1), 4100);
        assert_eq!(ack_deadline_ms(100, 2000, 3), 16100);
        assert_eq!(ack_deadline_ms(u64::MAX - 1, 2000, 2), u64::MAX);
    }

    #[test]
    fn test_retransmission_vectors() {
        let v = coap_test_vectors::retransmission::load();
        for bv in &v.backoff_vectors {
            let mut now = 0u64;
            let mut sent = con(Confirm::Pending, ack_deadline_ms(now, bv.base_timeout_ms, 0), 0);

            for (k, expected_wait) in bv.retransmit_deadlines_ms.iter().enumerate() {
                assert_eq!(sent.ack_deadline_ms - now, *expected_wait, "{} step {k}", bv.description);
                assert_eq!(
                    response_progress(&sent, sent.ack_deadline_ms - 1, v.max_retransmit, 5).unwrap(),
                    Progress::Waiting
                );
                now = sent.ack_deadline_ms;
                assert_eq!(
                    response_progress(&sent, now, v.max_retransmit, 5).unwrap(),
                    Progress::Retry
                );
                sent.retrans_counter += 1;
                sent.ack_deadline_ms = ack_deadline_ms(now, bv.base_timeout_ms, sent.retrans_counter);
            }

            assert_eq!(sent.retrans_counter, v.max_retransmit);
            assert_eq!(sent.ack_deadline_ms - now, bv.give_up_after_ms);
            assert_eq!(
                response_progress(&sent, sent.ack_deadline_ms, v.max_retransmit, 5),
                Err(EngineError::OutOfAttempts)
            );
        }
    }

    #[test]
    fn test_response_acked_and_reset() {
        assert_eq!(
            response_progress(&con(Confirm::Acked, 0, 0), 10_000, 4, 5).unwrap(),
            Progress::Done
        );
        assert_eq!(
            response_progress(&con(Confirm::Reset, 99_999, 0), 0, 4, 5),
            Err(EngineError::RemoteReset)
        );
    }

    #[test]
    fn test_unbounded_retransmit_keeps_retrying() {
        let sent = con(Confirm::Pending, 1000, u32::MAX - 1);
        assert_eq!(response_progress(&sent, 1000, u32::MAX, 5).unwrap(), Progress::Retry);
        let sent = con(Confirm::Pending, 1000, u32::MAX);
        assert_eq!(
            response_progress(&sent, 1000, u32::MAX, 5),
            Err(EngineError::OutOfAttempts)
        );
    }

    #[test]
    fn test_non_response_hold_time() {
        let sent = SentState {
            msg_type: MessageType::Non,
            confirm: Confirm::Pending,
            sent_at_secs: 10,
            ack_deadline_ms: 0,
            retrans_counter: 0,
        };
        assert_eq!(response_progress(&sent, 15_999, 4, 5).unwrap(), Progress::HoldingBack);
        assert_eq!(response_progress(&sent, 16_000, 4, 5).unwrap(), Progress::Done);
    }

    #[test]
    fn test_request_progress() {
        // unacked CON behaves like a response
        assert_eq!(
            request_progress(&con(Confirm::Pending, 2000, 0), 2000, 4, 45).unwrap(),
            Progress::Retry
        );
        // acked CON waits for the separate response, then times out
        assert_eq!(
            request_progress(&con(Confirm::Acked, 2000, 0), 45_000, 4, 45).unwrap(),
            Progress::Waiting
        );
        assert_eq!(
            request_progress(&con(Confirm::Acked, 2000, 0), 46_000, 4, 45),
            Err(EngineError::Timeout)
        );

        let non = SentState {
            msg_type: MessageType::Non,
            confirm: Confirm::Pending,
            sent_at_secs: 0,
            ack_deadline_ms: 0,
            retrans_counter: 0,
        };
        assert_eq!(request_progress(&non, 1000, 4, 45).unwrap(), Progress::Waiting);
        assert_eq!(request_progress(&non, 46_000, 4, 45), Err(EngineError::Timeout));
        assert_eq!(
            request_progress(&con(Confirm::Reset, 0, 0), 0, 4, 45),
            Err(EngineError::RemoteReset)
        );
    }

    #[test]
    fn test_is_older_than() {
        assert!(!is_older_than(10, 5, 15));
        assert!(is_older_than(10, 5, 16));
        assert!(!is_older_than(u64::MAX, 5, u64::MAX));
    }
}
