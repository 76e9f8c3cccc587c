//! Engine tuning parameters (RFC 7252 §4.8 transmission parameters plus
//! implementation limits).

use coap_core::constants::MAX_PAYLOAD_SIZE;

pub const ACK_TIMEOUT_SECS: u64 = 2;
/// ACK_RANDOM_FACTOR of 1.5 expressed in thousandths.
pub const ACK_RANDOM_FACTOR_PERMILLE: u64 = 1500;
pub const MAX_RETRANSMIT: u32 = 4;
pub const DEFAULT_LEISURE_SECS: u64 = 5;

/// Re-poll interval for a postponed resource handler.
pub const POSTPONE_WAIT_SECS: u64 = 3;
/// A postponed request is answered with 5.03 after this long.
pub const POSTPONE_MAX_WAIT_SECS: u64 = 30;
/// NON and piggybacked responses are kept this long to answer duplicates.
pub const NON_HOLD_SECS: u64 = 5;
/// Client gives up waiting for a separate response after this long.
pub const CLIENT_MAX_RESP_WAIT_SECS: u64 = 45;

/// RFC 7641 §4.5: send a CON at least every this many notifications.
pub const NOTIFY_CON_INTERVAL: u8 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub ack_timeout_secs: u64,
    pub ack_random_factor_permille: u64,
    pub max_retransmit: u32,
    pub default_leisure_secs: u64,
    pub postpone_wait_secs: u64,
    pub postpone_max_wait_secs: u64,
    pub non_hold_secs: u64,
    pub client_max_resp_wait_secs: u64,
    pub notify_con_interval: u8,
    /// Largest payload accepted on parse and largest block served.
    pub max_payload_size: usize,
    pub max_interactions: usize,
    pub max_observers: usize,
    pub enable_well_known_core: bool,
    /// Fixed RNG seed for reproducible timeouts, message ids and tokens.
    pub rng_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ack_timeout_secs: ACK_TIMEOUT_SECS,
            ack_random_factor_permille: ACK_RANDOM_FACTOR_PERMILLE,
            max_retransmit: MAX_RETRANSMIT,
            default_leisure_secs: DEFAULT_LEISURE_SECS,
            postpone_wait_secs: POSTPONE_WAIT_SECS,
            postpone_max_wait_secs: POSTPONE_MAX_WAIT_SECS,
            non_hold_secs: NON_HOLD_SECS,
            client_max_resp_wait_secs: CLIENT_MAX_RESP_WAIT_SECS,
            notify_con_interval: NOTIFY_CON_INTERVAL,
            max_payload_size: MAX_PAYLOAD_SIZE,
            max_interactions: 64,
            max_observers: 32,
            enable_well_known_core: true,
            rng_seed: None,
        }
    }
}

// Millisecond views saturate so oversized settings only push deadlines out.
impl EngineConfig {
    pub fn ack_timeout_ms(&self) -> u64 {
        self.ack_timeout_secs.saturating_mul(1000)
    }

    /// Upper bound of the randomized initial ACK timeout.
    pub fn max_initial_timeout_ms(&self) -> u64 {
        let scaled = u128::from(self.ack_timeout_ms()) * u128::from(self.ack_random_factor_permille) / 1000;
        u64::try_from(scaled).unwrap_or(u64::MAX)
    }

    pub fn postpone_wait_ms(&self) -> u64 {
        self.postpone_wait_secs.saturating_mul(1000)
    }

    pub fn max_leisure_ms(&self) -> u64 {
        self.default_leisure_secs.saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_rfc7252() {
        let c = EngineConfig::default();
        assert_eq!(c.ack_timeout_ms(), 2000);
        assert_eq!(c.max_initial_timeout_ms(), 3000);
        assert_eq!(c.max_retransmit, 4);
        assert_eq!(c.max_payload_size, 256);
        assert!(c.enable_well_known_core);
        assert_eq!(c.postpone_wait_ms(), 3000);
        assert_eq!(c.max_leisure_ms(), 5000);
    }

    #[test]
    fn test_oversized_timings_saturate() {
        let c = EngineConfig {
            ack_timeout_secs: u64::MAX / 10,
            ack_random_factor_permille: 1500,
            default_leisure_secs: u64::MAX,
            postpone_wait_secs: u64::MAX / 2,
            ..EngineConfig::default()
        };
        assert_eq!(c.ack_timeout_ms(), u64::MAX);
        assert_eq!(c.max_initial_timeout_ms(), u64::MAX);
        assert_eq!(c.postpone_wait_ms(), u64::MAX);
        assert_eq!(c.max_leisure_ms(), u64::MAX);
    }
}
