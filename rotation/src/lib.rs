//! Periodic maintenance of live tokens.
//!
//! A pass snapshots every active session, plans the writes it needs with
//! [`plan`], then applies them with conditional writes through a
//! [`Rotator`]. A pass never holds state between runs.

pub mod config;
pub mod plan;
pub mod rotator;

pub use config::RotationConfig;
pub use plan::{plan, RotationAction, SessionSnapshot};
pub use rotator::{RotationReport, Rotator};
