//! Push-notification seam.
//!
//! Delivery is best-effort: publishers log a failed [`Notifier::publish`]
//! and carry on. Clients subscribe per session via [`session_topic`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ChainId, ChainState, EntryStatus, Phase, SessionId, StandaloneKind, TokenId, UserId,
};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("failed to encode notification: {0}")]
    Encode(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Events published on a session topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A chain was seeded, hopped, overridden or closed.
    ChainUpdated {
        session_id: SessionId,
        chain_id: ChainId,
        phase: Phase,
        last_holder: UserId,
        last_seq: u64,
        state: ChainState,
    },
    /// A student's attendance milestone was written.
    Milestone {
        session_id: SessionId,
        student_id: UserId,
        entry_status: Option<EntryStatus>,
        exit_verified: Option<bool>,
        early_leave: bool,
    },
    /// A late-entry / early-leave window now shows a new token.
    WindowRotated {
        session_id: SessionId,
        kind: StandaloneKind,
        token_id: Option<TokenId>,
    },
    /// The session was ended and final statuses computed.
    SessionEnded { session_id: SessionId },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ChainUpdated { session_id, .. }
            | Self::Milestone { session_id, .. }
            | Self::WindowRotated { session_id, .. }
            | Self::SessionEnded { session_id } => session_id,
        }
    }
}

/// The topic every event for `session_id` is published on.
pub fn session_topic(session_id: &SessionId) -> String {
    format!("session/{session_id}")
}

pub trait Notifier: Send + Sync {
    fn publish(&self, topic: &str, event: &SessionEvent) -> Result<(), NotifyError>;
}
