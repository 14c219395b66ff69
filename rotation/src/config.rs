use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler tunables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Seconds between rotation passes.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Tokens expiring within this many seconds are replaced ahead of time.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,

    /// An active chain with no hop for this long is marked stalled.
    #[serde(default = "default_stall_after_secs")]
    pub stall_after_secs: u64,

    /// Consumed and expired tokens are deleted this long after expiry.
    #[serde(default = "default_purge_after_secs")]
    pub purge_after_secs: u64,
}

fn default_period_secs() -> u64 {
    5
}

fn default_safety_margin_secs() -> u64 {
    5
}

fn default_stall_after_secs() -> u64 {
    120
}

fn default_purge_after_secs() -> u64 {
    600
}

impl RotationConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs.max(1))
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    pub fn purge_after(&self) -> Duration {
        Duration::from_secs(self.purge_after_secs)
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            stall_after_secs: default_stall_after_secs(),
            purge_after_secs: default_purge_after_secs(),
        }
    }
}
