//! Sliding-window rate limiting per device fingerprint and per client IP.
//!
//! Each key keeps the timestamps of its recent hits. A hit is allowed when
//! fewer than `max_hits` hits fall inside the trailing window.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use baton_types::Timestamp;

use crate::GatekeeperConfig;

/// Outcome of a rate-limit check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { reason: String },
}

impl Hit {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Result of one [`SlidingWindowLimiter::try_hit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hit {
    Allowed,
    /// The key already used its hits for this window.
    OverLimit,
    /// The key is new and the table is full of keys that are all active.
    AtCapacity,
}

/// One sliding-window counter keyed by an arbitrary string.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_hits: u32,
    max_keys: usize,
    hits: Mutex<HashMap<String, VecDeque<Timestamp>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_hits: u32, max_keys: usize) -> Self {
        Self {
            window,
            max_hits,
            max_keys,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `key` at `now` if the window has room.
    ///
    /// Nothing is recorded unless the result is [`Hit::Allowed`]. A key not
    /// yet tracked is refused while the table is full of keys that are all
    /// still inside their window.
    pub fn try_hit(&self, key: &str, now: Timestamp) -> Hit {
        let Ok(mut hits) = self.hits.lock() else {
            // A poisoned limiter fails open; the audit log still records the attempt.
            return Hit::Allowed;
        };

        if !hits.contains_key(key) && hits.len() >= self.max_keys {
            Self::evict_idle(&mut hits, now, self.window);
            if hits.len() >= self.max_keys {
                tracing::warn!(
                    tracked = hits.len(),
                    max_keys = self.max_keys,
                    "rate limiter full; refusing new key"
                );
                return Hit::AtCapacity;
            }
        }

        let window = self.window;
        let entry = hits.entry(key.to_string()).or_default();
        while let Some(oldest) = entry.front() {
            if oldest.elapsed_since(now) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() as u32 >= self.max_hits {
            return Hit::OverLimit;
        }
        entry.push_back(now);
        Hit::Allowed
    }

    /// Hits currently inside the window for `key`.
    pub fn hits_in_window(&self, key: &str, now: Timestamp) -> usize {
        let Ok(hits) = self.hits.lock() else {
            return 0;
        };
        hits.get(key).map_or(0, |entry| {
            entry
                .iter()
                .filter(|t| t.elapsed_since(now) < self.window)
                .count()
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.hits.lock().map(|h| h.len()).unwrap_or(0)
    }

    fn evict_idle(hits: &mut HashMap<String, VecDeque<Timestamp>>, now: Timestamp, window: Duration) {
        hits.retain(|_, entry| {
            entry
                .back()
                .is_some_and(|last| last.elapsed_since(now) < window)
        });
    }
}

/// Fingerprint and IP limiters checked together.
pub struct RateLimiter {
    by_fingerprint: SlidingWindowLimiter,
    by_ip: SlidingWindowLimiter,
}

impl RateLimiter {
    pub fn new(config: &GatekeeperConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        Self {
            by_fingerprint: SlidingWindowLimiter::new(
                window,
                config.fingerprint_limit,
                config.max_tracked_keys,
            ),
            by_ip: SlidingWindowLimiter::new(window, config.ip_limit, config.max_tracked_keys),
        }
    }

    /// Check (and count) one attempt. Absent identifiers are not limited.
    pub fn check(&self, fingerprint: Option<&str>, ip: Option<&str>, now: Timestamp) -> RateDecision {
        if let Some(fp) = fingerprint {
            if let Some(denied) = deny(self.by_fingerprint.try_hit(fp, now), "this device") {
                return denied;
            }
        }
        if let Some(ip) = ip {
            if let Some(denied) = deny(self.by_ip.try_hit(ip, now), "this network address") {
                return denied;
            }
        }
        RateDecision::Allowed
    }
}

fn deny(hit: Hit, source: &str) -> Option<RateDecision> {
    let reason = match hit {
        Hit::Allowed => return None,
        Hit::OverLimit => format!("too many scan attempts from {source}"),
        Hit::AtCapacity => "limiter at capacity; try again shortly".to_string(),
    };
    Some(RateDecision::Denied { reason })
}
