//! Nullable clock: deterministic time for testing.

use baton_types::{Clock, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Shareable across threads.
#[derive(Debug)]
pub struct NullClock {
    current_ms: AtomicU64,
}

impl NullClock {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            current_ms: AtomicU64::new(initial.as_millis()),
        }
    }

    pub fn at_secs(secs: u64) -> Self {
        Self::new(Timestamp::from_secs(secs))
    }

    /// Advance time by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.current_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Advance time by a number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Set the time to a specific value.
    pub fn set(&self, now: Timestamp) {
        self.current_ms.store(now.as_millis(), Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.current_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_only_when_told() {
        let clock = NullClock::at_secs(100);
        assert_eq!(clock.now(), Timestamp::from_secs(100));
        clock.advance_secs(5);
        assert_eq!(clock.now(), Timestamp::from_secs(105));
        clock.set(Timestamp::from_millis(7));
        assert_eq!(clock.now().as_millis(), 7);
    }
}
