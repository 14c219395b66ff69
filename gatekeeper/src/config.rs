use serde::{Deserialize, Serialize};

/// Gatekeeper tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Attempts allowed per device fingerprint per window.
    #[serde(default = "default_fingerprint_limit")]
    pub fingerprint_limit: u32,

    /// Attempts allowed per client IP per window. A whole classroom may
    /// share one NAT address.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: u32,

    /// Sliding window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Keys tracked per limiter before idle ones are evicted.
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,

    /// Block (instead of warn) when a geofence is enforced and the client
    /// sends neither a GPS fix nor an allowed BSSID.
    #[serde(default)]
    pub require_location_when_enforced: bool,
}

fn default_fingerprint_limit() -> u32 {
    10
}

fn default_ip_limit() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            fingerprint_limit: default_fingerprint_limit(),
            ip_limit: default_ip_limit(),
            window_secs: default_window_secs(),
            max_tracked_keys: default_max_tracked_keys(),
            require_location_when_enforced: false,
        }
    }
}
