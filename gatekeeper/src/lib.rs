//! Pre-mutation checks for scan requests.
//!
//! The [`Gatekeeper`] runs before any state change: it rate limits by device
//! fingerprint and client IP, validates the reported location against the
//! session geofence, and writes one audit row per attempt.

pub mod audit;
pub mod config;
pub mod geofence;
pub mod rate_limit;

use std::sync::Arc;

use baton_store::AttendanceStore;
use baton_types::{GeoPoint, Geofence, RandomSource, Timestamp};

pub use audit::{ScanAttempt, ScanAuditor, ScanContext};
pub use config::GatekeeperConfig;
pub use geofence::{haversine_m, validate_location, LocationVerdict};
pub use rate_limit::{Hit, RateDecision, RateLimiter, SlidingWindowLimiter};

pub struct Gatekeeper {
    config: GatekeeperConfig,
    limiter: RateLimiter,
    auditor: ScanAuditor,
}

impl Gatekeeper {
    pub fn new(
        config: GatekeeperConfig,
        store: Arc<dyn AttendanceStore>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(&config),
            auditor: ScanAuditor::new(store, random),
            config,
        }
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    pub fn check_rate_limit(
        &self,
        fingerprint: Option<&str>,
        ip: Option<&str>,
        now: Timestamp,
    ) -> RateDecision {
        self.limiter.check(fingerprint, ip, now)
    }

    pub fn validate_location(
        &self,
        fence: Option<&Geofence>,
        gps: Option<GeoPoint>,
        bssid: Option<&str>,
    ) -> LocationVerdict {
        validate_location(fence, gps, bssid, self.config.require_location_when_enforced)
    }

    pub fn log_scan(
        &self,
        attempt: &ScanAttempt<'_>,
        outcome: &str,
        warnings: Vec<String>,
        distance_m: Option<f64>,
    ) {
        self.auditor.log_scan(attempt, outcome, warnings, distance_m);
    }
}
