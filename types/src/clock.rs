//! Time source seam.
//!
//! Engines never call `Timestamp::now()` directly; they take a [`Clock`] so
//! tests can drive expiry deterministically.

use crate::Timestamp;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}
