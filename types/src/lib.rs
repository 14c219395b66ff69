//! Fundamental types for the Baton attendance relay.
//!
//! This crate defines the core types shared across every other crate in the
//! workspace: identifiers, timestamps, lifecycle enums, caller identity,
//! geofence descriptions, and the clock / randomness / notification seams
//! that the engines are written against.

pub mod clock;
pub mod error;
pub mod geo;
pub mod ids;
pub mod identity;
pub mod notify;
pub mod random;
pub mod state;
pub mod time;

pub use clock::{Clock, SystemClock};
pub use error::TypesError;
pub use geo::{GeoPoint, Geofence};
pub use identity::{Identity, Role};
pub use ids::{ChainId, SessionId, TokenId, UserId};
pub use notify::{session_topic, NotifyError, Notifier, SessionEvent};
pub use random::{OsRandom, RandomSource};
pub use state::{
    ChainState, EntryStatus, FinalStatus, Phase, SessionStatus, StandaloneKind, TokenStatus,
};
pub use time::Timestamp;

/// Synthetic origin recorded as `from_holder` on the seed row of every chain.
pub const TEACHER_ORIGIN: &str = "TEACHER";
