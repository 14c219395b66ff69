//! Controllable stand-ins for the clock, entropy, storage and event
//! fan-out seams.
//!
//! Each double is deterministic and never touches the filesystem or the
//! network. Tests drive them directly: advance the clock, script the random
//! bytes, make one store table refuse writes, or read back the events a
//! notifier saw.
//!
//! [`NullStore`] doubles as the in-memory backend for `--memory` nodes.

pub mod clock;
pub mod notifier;
pub mod random;
pub mod store;

pub use clock::NullClock;
pub use notifier::NullNotifier;
pub use random::NullRandom;
pub use store::NullStore;
