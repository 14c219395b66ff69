//! The Baton relay: challenge verification, chain hops and session
//! lifecycle.
//!
//! Engines are synchronous and hold only shared handles, so one instance
//! can serve concurrent callers. All coordination happens through the
//! store's conditional writes.

pub mod authorize;
pub mod challenge;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod milestone;
pub mod selection;
pub mod session;

pub use challenge::{ChallengeIssued, ChallengeVerifier};
pub use config::RelayConfig;
pub use context::RelayContext;
pub use engine::{ChainEngine, CloseOutcome, HopOutcome, HopRequest};
pub use error::{ErrorCategory, RelayError};
pub use milestone::{Applied, Milestone};
pub use selection::select_students;
pub use session::{EndSummary, NewSession, SessionManager, StandaloneScan};
