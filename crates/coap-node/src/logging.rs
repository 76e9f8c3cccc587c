//! Tracing subscriber configuration for CoAP nodes.
//!
//! Log levels follow these conventions:
//! - ERROR: Unrecoverable failures (socket bind, startup)
//! - WARN: Recoverable errors, dropped datagrams, failed sends
//! - INFO: Lifecycle and observer registration events
//! - DEBUG: Interaction state changes, matched and unmatched messages
//! - TRACE: Wire-level data

use tracing_subscriber::EnvFilter;

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins over `default_level` (the `[logging]` level from config).
pub fn init(default_level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(default_level)).init();
}

/// Initialize the tracing subscriber with JSON output.
///
/// Activated by setting `RUST_LOG_FORMAT=json`.
pub fn init_json(default_level: &str) {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` to avoid panicking if called multiple times.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
