//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use baton_gatekeeper::GatekeeperConfig;
use baton_relay::RelayConfig;
use baton_rotation::RotationConfig;

use crate::NodeError;

/// Configuration for a Baton node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Engine tunables live in the
/// nested `[relay]`, `[rotation]` and `[gatekeeper]` tables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory for the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep all state in memory instead of LMDB. Nothing survives a restart.
    #[serde(default)]
    pub memory: bool,

    /// LMDB map size in bytes.
    #[serde(default = "default_lmdb_map_size")]
    pub lmdb_map_size: usize,

    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Whether to serve the Prometheus `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Hex-encoded key for challenge-code derivation. A random key is
    /// generated at startup when absent, which invalidates pending
    /// challenges across restarts.
    #[serde(default)]
    pub challenge_secret: Option<String>,

    /// Buffered session events per WebSocket subscriber before it lags.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub rotation: RotationConfig,

    #[serde(default)]
    pub gatekeeper: GatekeeperConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./baton_data")
}

fn default_lmdb_map_size() -> usize {
    baton_store_lmdb::DEFAULT_MAP_SIZE
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_rpc_port() -> u16 {
    7480
}

fn default_true() -> bool {
    true
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, NodeError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| NodeError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.relay.chain_token_ttl_secs == 0 || self.relay.standalone_token_ttl_secs == 0 {
            return Err(NodeError::Config("token lifetimes must be positive".into()));
        }
        if self.relay.challenge_ttl_secs == 0 {
            return Err(NodeError::Config("challenge_ttl_secs must be positive".into()));
        }
        if self.rotation.safety_margin_secs >= self.relay.chain_token_ttl_secs {
            return Err(NodeError::Config(format!(
                "rotation safety margin ({}s) must be shorter than the chain token lifetime ({}s)",
                self.rotation.safety_margin_secs, self.relay.chain_token_ttl_secs
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(NodeError::Config("event_channel_capacity must be positive".into()));
        }
        if let Some(secret) = &self.challenge_secret {
            self.decode_secret(secret)?;
        }
        Ok(())
    }

    /// The configured challenge key, decoded, if one is set.
    pub fn challenge_key(&self) -> Result<Option<Vec<u8>>, NodeError> {
        self.challenge_secret
            .as_deref()
            .map(|s| self.decode_secret(s))
            .transpose()
    }

    fn decode_secret(&self, secret: &str) -> Result<Vec<u8>, NodeError> {
        let key = hex::decode(secret.trim())
            .map_err(|e| NodeError::Config(format!("challenge_secret is not hex: {e}")))?;
        if key.len() < 16 {
            return Err(NodeError::Config(
                "challenge_secret must be at least 16 bytes".into(),
            ));
        }
        Ok(key)
    }

    /// `bind_address:rpc_port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.rpc_port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            memory: false,
            lmdb_map_size: default_lmdb_map_size(),
            bind_address: default_bind_address(),
            rpc_port: default_rpc_port(),
            enable_metrics: default_true(),
            challenge_secret: None,
            event_channel_capacity: default_event_channel_capacity(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            relay: RelayConfig::default(),
            rotation: RotationConfig::default(),
            gatekeeper: GatekeeperConfig::default(),
        }
    }
}
