//! Lifecycle enums for sessions, chains, tokens and attendance records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Which attendance milestone a chain's relay marks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Arrival: marks `PRESENT_ENTRY` / `LATE_ENTRY`.
    Entry,
    /// Departure: marks `exit_verified`.
    Exit,
    /// Ad-hoc presence check; only refreshes liveness.
    Snapshot,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Exit => "EXIT",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ENTRY" => Ok(Self::Entry),
            "EXIT" => Ok(Self::Exit),
            "SNAPSHOT" => Ok(Self::Snapshot),
            _ => Err(TypesError::InvalidPhase(s.to_string())),
        }
    }
}

/// The state of a relay chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainState {
    /// Advancing normally.
    Active,
    /// No hop within the stall window. Still accepts hops.
    Stalled,
    /// Closed by the teacher or at session end. Terminal.
    Completed,
}

impl ChainState {
    /// Whether a hop (or keep-alive reissue) may still happen on this chain.
    pub fn accepts_hops(&self) -> bool {
        matches!(self, Self::Active | Self::Stalled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Stalled => "STALLED",
            Self::Completed => "COMPLETED",
        }
    }
}

/// Lifecycle of a single token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    /// Usable until `expires_at`.
    Active,
    /// Spent by a hop, an override, or replaced by rotation.
    Consumed,
    /// Marked by the expiry sweep.
    Expired,
}

/// The two teacher-projected token kinds that are not part of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandaloneKind {
    LateEntry,
    EarlyLeave,
}

impl StandaloneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LateEntry => "LATE_ENTRY",
            Self::EarlyLeave => "EARLY_LEAVE",
        }
    }
}

impl fmt::Display for StandaloneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StandaloneKind {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "LATE_ENTRY" => Ok(Self::LateEntry),
            "EARLY_LEAVE" => Ok(Self::EarlyLeave),
            _ => Err(TypesError::InvalidTokenKind(s.to_string())),
        }
    }
}

/// Lifecycle of a class session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    /// Frozen: no further mutation is accepted.
    Ended,
}

/// How a student's arrival was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    PresentEntry,
    LateEntry,
}

/// Final attendance verdict, computed when the session ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalStatus {
    Present,
    Late,
    EarlyLeave,
    Absent,
}
