//! Session records.

use baton_types::{
    Geofence, SessionId, SessionStatus, StandaloneKind, Timestamp, TokenId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Etag, Versioned};
use crate::StoreError;

/// All sessions share one partition; the row key is the session id.
pub const SESSION_PARTITION: &str = "session";

/// A class session owned by one teacher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub teacher_id: UserId,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    /// Arrivals after `starts_at + late_cutoff_minutes` are marked late.
    pub late_cutoff_minutes: u32,
    /// Leaving within this many minutes of `ends_at` is not an early leave.
    pub exit_window_minutes: u32,
    pub status: SessionStatus,
    pub late_entry_active: bool,
    pub current_late_token: Option<TokenId>,
    pub early_leave_active: bool,
    pub current_early_token: Option<TokenId>,
    pub geofence: Option<Geofence>,
    pub created_at: Timestamp,
}

impl SessionRecord {
    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// The last instant an entry still counts as on time.
    pub fn late_cutoff(&self) -> Timestamp {
        self.starts_at.plus_minutes(self.late_cutoff_minutes)
    }

    /// When leaving stops counting as an early leave.
    pub fn exit_window_opens_at(&self) -> Timestamp {
        let window_ms = u64::from(self.exit_window_minutes) * 60_000;
        Timestamp::from_millis(self.ends_at.as_millis().saturating_sub(window_ms))
    }

    /// `(enabled, current token)` for a standalone window.
    pub fn window(&self, kind: StandaloneKind) -> (bool, Option<&TokenId>) {
        match kind {
            StandaloneKind::LateEntry => {
                (self.late_entry_active, self.current_late_token.as_ref())
            }
            StandaloneKind::EarlyLeave => {
                (self.early_leave_active, self.current_early_token.as_ref())
            }
        }
    }

    /// Set the flag and token pointer of a standalone window.
    pub fn set_window(&mut self, kind: StandaloneKind, active: bool, token: Option<TokenId>) {
        match kind {
            StandaloneKind::LateEntry => {
                self.late_entry_active = active;
                self.current_late_token = token;
            }
            StandaloneKind::EarlyLeave => {
                self.early_leave_active = active;
                self.current_early_token = token;
            }
        }
    }
}

impl Entity for SessionRecord {
    const TABLE: &'static str = "sessions";

    fn partition_key(&self) -> String {
        SESSION_PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        self.id.to_string()
    }
}

/// Typed access to session rows.
pub trait SessionStore: EntityStore<SessionRecord> {
    fn create_session(
        &self,
        session: &SessionRecord,
    ) -> Result<Versioned<SessionRecord>, StoreError> {
        let etag = EntityStore::<SessionRecord>::create(self, session)?;
        Ok(Versioned::new(session.clone(), etag))
    }

    fn get_session(&self, id: &SessionId) -> Result<Versioned<SessionRecord>, StoreError> {
        EntityStore::<SessionRecord>::get(self, SESSION_PARTITION, id.as_str())
    }

    fn find_session(&self, id: &SessionId) -> Result<Option<Versioned<SessionRecord>>, StoreError> {
        EntityStore::<SessionRecord>::find(self, SESSION_PARTITION, id.as_str())
    }

    fn replace_session(
        &self,
        session: &SessionRecord,
        expected: Etag,
    ) -> Result<Versioned<SessionRecord>, StoreError> {
        let etag = EntityStore::<SessionRecord>::replace(self, session, expected)?;
        Ok(Versioned::new(session.clone(), etag))
    }

    fn delete_session(&self, id: &SessionId) -> Result<bool, StoreError> {
        EntityStore::<SessionRecord>::delete(self, SESSION_PARTITION, id.as_str(), None)
    }

    fn list_sessions(
        &self,
        filter: &dyn Fn(&SessionRecord) -> bool,
    ) -> Result<Vec<Versioned<SessionRecord>>, StoreError> {
        EntityStore::<SessionRecord>::list_by_filter(self, Some(SESSION_PARTITION), filter)
    }
}

impl<S: EntityStore<SessionRecord> + ?Sized> SessionStore for S {}
