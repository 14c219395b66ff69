use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token and challenge lifetimes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Lifetime of a chain token before rotation must reissue it.
    #[serde(default = "default_chain_token_ttl_secs")]
    pub chain_token_ttl_secs: u64,

    /// How long a requested challenge code stays valid.
    #[serde(default = "default_challenge_ttl_secs")]
    pub challenge_ttl_secs: u64,

    /// Lifetime of a projected late-entry / early-leave token.
    #[serde(default = "default_standalone_token_ttl_secs")]
    pub standalone_token_ttl_secs: u64,

    /// Attempts for read-modify-write loops on attendance and session rows.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

fn default_chain_token_ttl_secs() -> u64 {
    45
}

fn default_challenge_ttl_secs() -> u64 {
    30
}

fn default_standalone_token_ttl_secs() -> u64 {
    30
}

fn default_max_write_attempts() -> u32 {
    5
}

impl RelayConfig {
    pub fn chain_token_ttl(&self) -> Duration {
        Duration::from_secs(self.chain_token_ttl_secs)
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn standalone_token_ttl(&self) -> Duration {
        Duration::from_secs(self.standalone_token_ttl_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chain_token_ttl_secs: default_chain_token_ttl_secs(),
            challenge_ttl_secs: default_challenge_ttl_secs(),
            standalone_token_ttl_secs: default_standalone_token_ttl_secs(),
            max_write_attempts: default_max_write_attempts(),
        }
    }
}
