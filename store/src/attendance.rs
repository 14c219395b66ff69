//! Per-student attendance records.

use baton_types::{EntryStatus, FinalStatus, Phase, SessionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Etag, Versioned};
use crate::session::SessionRecord;
use crate::StoreError;

/// Attendance state of one student in one session.
///
/// Milestones (`entry_status`, `exit_verified`, `early_leave_at`) are each
/// written at most once; later writers must leave a set milestone alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub student_id: UserId,
    pub entry_status: Option<EntryStatus>,
    pub entry_at: Option<Timestamp>,
    pub exit_verified: bool,
    pub exit_verified_at: Option<Timestamp>,
    pub early_leave_at: Option<Timestamp>,
    pub is_online: bool,
    pub last_seen_at: Option<Timestamp>,
    /// Only populated once the session has ended.
    pub final_status: Option<FinalStatus>,
    pub enrolled_at: Timestamp,
}

impl AttendanceRecord {
    pub fn new(session_id: SessionId, student_id: UserId, now: Timestamp) -> Self {
        Self {
            session_id,
            student_id,
            entry_status: None,
            entry_at: None,
            exit_verified: false,
            exit_verified_at: None,
            early_leave_at: None,
            is_online: false,
            last_seen_at: None,
            final_status: None,
            enrolled_at: now,
        }
    }

    /// Whether this student may be picked as a seed holder for `phase`.
    pub fn eligible_for(&self, phase: Phase) -> bool {
        if !self.is_online {
            return false;
        }
        match phase {
            Phase::Entry => self.entry_status.is_none(),
            Phase::Exit => {
                self.entry_status.is_some() && self.early_leave_at.is_none() && !self.exit_verified
            }
            Phase::Snapshot => true,
        }
    }

    /// Whether the milestone `phase` marks has already been written.
    pub fn has_milestone(&self, phase: Phase) -> bool {
        match phase {
            Phase::Entry => self.entry_status.is_some(),
            Phase::Exit => self.exit_verified,
            Phase::Snapshot => false,
        }
    }

    /// The verdict for this student once `session` has ended.
    pub fn compute_final_status(&self, session: &SessionRecord) -> FinalStatus {
        let Some(entry) = self.entry_status else {
            return FinalStatus::Absent;
        };
        if let Some(left_at) = self.early_leave_at {
            if left_at < session.exit_window_opens_at() {
                return FinalStatus::EarlyLeave;
            }
        }
        match entry {
            EntryStatus::PresentEntry => FinalStatus::Present,
            EntryStatus::LateEntry => FinalStatus::Late,
        }
    }
}

impl Entity for AttendanceRecord {
    const TABLE: &'static str = "attendance";

    fn partition_key(&self) -> String {
        self.session_id.to_string()
    }

    fn row_key(&self) -> String {
        self.student_id.to_string()
    }
}

/// Typed access to attendance rows.
pub trait AttendanceRecordStore: EntityStore<AttendanceRecord> {
    fn create_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> Result<Versioned<AttendanceRecord>, StoreError> {
        let etag = EntityStore::<AttendanceRecord>::create(self, record)?;
        Ok(Versioned::new(record.clone(), etag))
    }

    fn get_attendance(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
    ) -> Result<Versioned<AttendanceRecord>, StoreError> {
        EntityStore::<AttendanceRecord>::get(self, session_id.as_str(), student_id.as_str())
    }

    fn find_attendance(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
    ) -> Result<Option<Versioned<AttendanceRecord>>, StoreError> {
        EntityStore::<AttendanceRecord>::find(self, session_id.as_str(), student_id.as_str())
    }

    fn replace_attendance(
        &self,
        record: &AttendanceRecord,
        expected: Etag,
    ) -> Result<Versioned<AttendanceRecord>, StoreError> {
        let etag = EntityStore::<AttendanceRecord>::replace(self, record, expected)?;
        Ok(Versioned::new(record.clone(), etag))
    }

    fn delete_attendance(
        &self,
        session_id: &SessionId,
        student_id: &UserId,
    ) -> Result<bool, StoreError> {
        EntityStore::<AttendanceRecord>::delete(
            self,
            session_id.as_str(),
            student_id.as_str(),
            None,
        )
    }

    fn session_attendance(
        &self,
        session_id: &SessionId,
        filter: &dyn Fn(&AttendanceRecord) -> bool,
    ) -> Result<Vec<Versioned<AttendanceRecord>>, StoreError> {
        EntityStore::<AttendanceRecord>::list_by_filter(self, Some(session_id.as_str()), filter)
    }
}

impl<S: EntityStore<AttendanceRecord> + ?Sized> AttendanceRecordStore for S {}
