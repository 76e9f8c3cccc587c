//! TOML-based configuration for CoAP nodes.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use coap_engine::{AllowedMethods, EngineConfig};

use crate::error::NodeError;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
pub struct NodeSection {
    /// Unicast listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Optional multicast listener; requests it receives are answered after
    /// the leisure period.
    pub multicast: Option<MulticastSection>,
    /// Period of the engine work loop in milliseconds.
    #[serde(default = "default_work_interval_ms")]
    pub work_interval_ms: u64,
    /// Register the built-in `uptime` and `upload` resources.
    #[serde(default = "default_true")]
    pub builtin_resources: bool,
    /// Seconds between `uptime` notifications. 0 disables.
    #[serde(default = "default_uptime_notify_secs")]
    pub uptime_notify_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:5683".to_string()
}

fn default_work_interval_ms() -> u64 {
    50
}

fn default_uptime_notify_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            multicast: None,
            work_interval_ms: default_work_interval_ms(),
            builtin_resources: default_true(),
            uptime_notify_secs: default_uptime_notify_secs(),
        }
    }
}

/// The `[node.multicast]` section.
#[derive(Debug, Deserialize)]
pub struct MulticastSection {
    /// Group address, e.g. "224.0.1.187" (All-CoAP-Nodes).
    pub group: String,
    #[serde(default = "default_multicast_bind")]
    pub bind: String,
}

fn default_multicast_bind() -> String {
    "0.0.0.0:5684".to_string()
}

/// The `[engine]` section. Missing keys keep the RFC 7252 defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub ack_timeout_secs: u64,
    pub ack_random_factor_permille: u64,
    pub max_retransmit: u32,
    pub default_leisure_secs: u64,
    pub postpone_wait_secs: u64,
    pub postpone_max_wait_secs: u64,
    pub non_hold_secs: u64,
    pub client_max_resp_wait_secs: u64,
    pub notify_con_interval: u8,
    pub max_payload_size: usize,
    pub max_interactions: usize,
    pub max_observers: usize,
    pub enable_well_known_core: bool,
    pub rng_seed: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            ack_timeout_secs: d.ack_timeout_secs,
            ack_random_factor_permille: d.ack_random_factor_permille,
            max_retransmit: d.max_retransmit,
            default_leisure_secs: d.default_leisure_secs,
            postpone_wait_secs: d.postpone_wait_secs,
            postpone_max_wait_secs: d.postpone_max_wait_secs,
            non_hold_secs: d.non_hold_secs,
            client_max_resp_wait_secs: d.client_max_resp_wait_secs,
            notify_con_interval: d.notify_con_interval,
            max_payload_size: d.max_payload_size,
            max_interactions: d.max_interactions,
            max_observers: d.max_observers,
            enable_well_known_core: d.enable_well_known_core,
            rng_seed: d.rng_seed,
        }
    }
}

/// Ceiling for every `[engine]` timing field: one day.
pub const MAX_ENGINE_SECS: u64 = 86_400;

impl EngineSection {
    /// Validate and convert into the engine's configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig, NodeError> {
        let timings = [
            ("ack_timeout_secs", self.ack_timeout_secs),
            ("default_leisure_secs", self.default_leisure_secs),
            ("postpone_wait_secs", self.postpone_wait_secs),
            ("postpone_max_wait_secs", self.postpone_max_wait_secs),
            ("non_hold_secs", self.non_hold_secs),
            ("client_max_resp_wait_secs", self.client_max_resp_wait_secs),
        ];
        for (name, secs) in timings {
            if secs > MAX_ENGINE_SECS {
                return Err(NodeError::Config(format!(
                    "{name} must be at most {MAX_ENGINE_SECS}, got {secs}"
                )));
            }
        }
        if self.ack_random_factor_permille > 10_000 {
            return Err(NodeError::Config(format!(
                "ack_random_factor_permille must be at most 10000, got {}",
                self.ack_random_factor_permille
            )));
        }
        if self.ack_random_factor_permille < 1000 {
            return Err(NodeError::Config(format!(
                "ack_random_factor_permille must be at least 1000, got {}",
                self.ack_random_factor_permille
            )));
        }
        if self.max_payload_size < 16 {
            return Err(NodeError::Config(format!(
                "max_payload_size must be at least 16, got {}",
                self.max_payload_size
            )));
        }
        Ok(EngineConfig {
            ack_timeout_secs: self.ack_timeout_secs,
            ack_random_factor_permille: self.ack_random_factor_permille,
            max_retransmit: self.max_retransmit,
            default_leisure_secs: self.default_leisure_secs,
            postpone_wait_secs: self.postpone_wait_secs,
            postpone_max_wait_secs: self.postpone_max_wait_secs,
            non_hold_secs: self.non_hold_secs,
            client_max_resp_wait_secs: self.client_max_resp_wait_secs,
            notify_con_interval: self.notify_con_interval,
            max_payload_size: self.max_payload_size,
            max_interactions: self.max_interactions,
            max_observers: self.max_observers,
            enable_well_known_core: self.enable_well_known_core,
            rng_seed: self.rng_seed,
        })
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The `[storage]` section.
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Seconds between observer snapshots. 0 persists only at shutdown.
    #[serde(default = "default_persist_interval")]
    pub persist_interval: u64,
}

fn default_storage_path() -> String {
    "coap-storage".to_string()
}

fn default_persist_interval() -> u64 {
    300
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            enable: default_true(),
            path: default_storage_path(),
            persist_interval: default_persist_interval(),
        }
    }
}

/// A `[[resources]]` entry: a text resource served from memory.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub payload: String,
    pub content_format: Option<u16>,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub observable: bool,
}

fn default_methods() -> Vec<String> {
    vec!["GET".to_string()]
}

/// Parse a socket address string like "0.0.0.0:5683".
pub fn parse_socket_addr(s: &str) -> Result<SocketAddr, NodeError> {
    s.parse()
        .map_err(|e| NodeError::Config(format!("invalid socket address '{s}': {e}")))
}

/// Parse a multicast group address.
pub fn parse_group(s: &str) -> Result<IpAddr, NodeError> {
    let addr: IpAddr = s
        .parse()
        .map_err(|e| NodeError::Config(format!("invalid group address '{s}': {e}")))?;
    if !addr.is_multicast() {
        return Err(NodeError::Config(format!("'{s}' is not a multicast address")));
    }
    Ok(addr)
}

/// Parse a list of method names into a method set.
pub fn parse_methods(names: &[String]) -> Result<AllowedMethods, NodeError> {
    let mut allowed = AllowedMethods::NONE;
    for name in names {
        let method = AllowedMethods::from_name(name)
            .ok_or_else(|| NodeError::Config(format!("unknown method: {name}")))?;
        allowed = allowed | method;
    }
    if allowed.is_empty() {
        return Err(NodeError::Config("resource allows no methods".into()));
    }
    Ok(allowed)
}

/// Parse a file path string.
pub fn parse_path(s: &str) -> PathBuf {
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.node.bind, "0.0.0.0:5683");
        assert!(config.node.multicast.is_none());
        assert!(config.node.builtin_resources);
        assert_eq!(config.logging.level, "info");
        assert!(config.storage.enable);
        assert_eq!(config.storage.persist_interval, 300);
        assert!(config.resources.is_empty());
        assert_eq!(config.engine.to_engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[node]
bind = "127.0.0.1:5683"
work_interval_ms = 20
builtin_resources = false
uptime_notify_secs = 0

[node.multicast]
group = "224.0.1.187"

[engine]
ack_timeout_secs = 3
max_payload_size = 512
max_observers = 4
rng_seed = 9

[logging]
level = "debug"

[storage]
path = "/var/lib/coap"
persist_interval = 60

[[resources]]
path = "sensors/temp"
title = "Temperature"
payload = "21.5"
content_format = 0
observable = true

[[resources]]
path = "led"
methods = ["GET", "put"]
"#;
        let config = NodeConfig::parse(toml).unwrap();
        assert_eq!(config.node.bind, "127.0.0.1:5683");
        assert_eq!(config.node.work_interval_ms, 20);
        assert!(!config.node.builtin_resources);
        let multicast = config.node.multicast.as_ref().unwrap();
        assert_eq!(multicast.group, "224.0.1.187");
        assert_eq!(multicast.bind, "0.0.0.0:5684");

        let engine = config.engine.to_engine_config().unwrap();
        assert_eq!(engine.ack_timeout_secs, 3);
        assert_eq!(engine.max_payload_size, 512);
        assert_eq!(engine.max_observers, 4);
        assert_eq!(engine.rng_seed, Some(9));
        assert_eq!(engine.max_retransmit, 4);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.path, "/var/lib/coap");
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[0].content_format, Some(0));
        assert!(config.resources[0].observable);
        assert_eq!(config.resources[1].title, "");
        assert_eq!(
            parse_methods(&config.resources[1].methods).unwrap(),
            AllowedMethods::GET | AllowedMethods::PUT
        );
        assert_eq!(parse_methods(&config.resources[0].methods).unwrap(), AllowedMethods::GET);
    }

    #[test]
    fn test_parse_malformed_toml() {
        assert!(NodeConfig::parse("[node").is_err());
        assert!(NodeConfig::parse("[node]\nbind = ").is_err());
        assert!(NodeConfig::parse("= value").is_err());
    }

    #[test]
    fn test_parse_wrong_field_types() {
        assert!(NodeConfig::parse("[engine]\nmax_retransmit = \"four\"\n").is_err());
        assert!(NodeConfig::parse("[node]\nbuiltin_resources = \"yes\"\n").is_err());
    }

    #[test]
    fn test_resource_requires_path() {
        assert!(NodeConfig::parse("[[resources]]\ntitle = \"x\"\n").is_err());
    }

    #[test]
    fn test_engine_section_validation() {
        let config = NodeConfig::parse("[engine]\nack_random_factor_permille = 900\n").unwrap();
        assert!(config.engine.to_engine_config().is_err());
        let config = NodeConfig::parse("[engine]\nmax_payload_size = 8\n").unwrap();
        assert!(config.engine.to_engine_config().is_err());
    }

    #[test]
    fn test_engine_timings_are_bounded() {
        let config = NodeConfig::parse("[engine]\npostpone_wait_secs = 18446744073709551615\n");
        // toml integers are i64; the largest one still has to be rejected
        assert!(config.is_err() || config.unwrap().engine.to_engine_config().is_err());

        let config = NodeConfig::parse("[engine]\nack_timeout_secs = 9223372036854775807\n").unwrap();
        let err = config.engine.to_engine_config().unwrap_err();
        assert!(err.to_string().contains("ack_timeout_secs"), "{err}");

        let config = NodeConfig::parse("[engine]\nnon_hold_secs = 86401\n").unwrap();
        assert!(config.engine.to_engine_config().is_err());
        let config = NodeConfig::parse("[engine]\nack_random_factor_permille = 10001\n").unwrap();
        assert!(config.engine.to_engine_config().is_err());

        let config = NodeConfig::parse("[engine]\nclient_max_resp_wait_secs = 86400\n").unwrap();
        assert_eq!(config.engine.to_engine_config().unwrap().client_max_resp_wait_secs, MAX_ENGINE_SECS);
    }

    #[test]
    fn test_parse_methods() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(
            parse_methods(&names(&["get", "POST", "Delete"])).unwrap(),
            AllowedMethods::GET | AllowedMethods::POST | AllowedMethods::DELETE
        );
        assert!(parse_methods(&names(&["PATCH"])).is_err());
        assert!(parse_methods(&[]).is_err());
    }

    #[test]
    fn test_parse_addresses() {
        assert!(parse_socket_addr("").is_err());
        assert!(parse_socket_addr("not_valid").is_err());
        assert_eq!(parse_socket_addr("[::1]:5683").unwrap().port(), 5683);
        assert!(parse_group("224.0.1.187").is_ok());
        assert!(parse_group("ff02::fd").is_ok());
        assert!(parse_group("192.0.2.1").is_err());
        assert!(parse_group("nonsense").is_err());
    }
}
