//! Attendance milestone writes.
//!
//! A milestone is written at most once; applying it again leaves the
//! record untouched apart from liveness. Writes are read-modify-write with
//! a conditional replace, retried on conflict.

use baton_store::{AttendanceRecord, AttendanceRecordStore, SessionRecord};
use baton_types::{EntryStatus, Phase, SessionEvent, StandaloneKind, Timestamp, UserId};

use crate::{RelayContext, RelayError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Milestone {
    /// Peer-verified arrival: on time or late by the session cutoff.
    Entry,
    /// Peer-verified presence at the end.
    Exit,
    /// Liveness refresh only.
    Snapshot,
    /// Scanned the projected late-entry token.
    LateEntry,
    /// Scanned the projected early-leave token.
    EarlyLeave,
}

/// What applying a milestone changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Unchanged,
    Liveness,
    Milestone,
}

impl Milestone {
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Entry => Self::Entry,
            Phase::Exit => Self::Exit,
            Phase::Snapshot => Self::Snapshot,
        }
    }

    pub fn for_standalone(kind: StandaloneKind) -> Self {
        match kind {
            StandaloneKind::LateEntry => Self::LateEntry,
            StandaloneKind::EarlyLeave => Self::EarlyLeave,
        }
    }

    pub fn apply(
        &self,
        record: &mut AttendanceRecord,
        session: &SessionRecord,
        now: Timestamp,
    ) -> Applied {
        let milestone = match self {
            Self::Entry if record.entry_status.is_none() => {
                record.entry_status = Some(if now <= session.late_cutoff() {
                    EntryStatus::PresentEntry
                } else {
                    EntryStatus::LateEntry
                });
                record.entry_at = Some(now);
                true
            }
            Self::LateEntry if record.entry_status.is_none() => {
                record.entry_status = Some(EntryStatus::LateEntry);
                record.entry_at = Some(now);
                true
            }
            Self::Exit if !record.exit_verified => {
                record.exit_verified = true;
                record.exit_verified_at = Some(now);
                true
            }
            Self::EarlyLeave
                if record.entry_status.is_some()
                    && !record.exit_verified
                    && record.early_leave_at.is_none() =>
            {
                record.early_leave_at = Some(now);
                true
            }
            _ => false,
        };

        // Scanning a leave token is not evidence of being in the room.
        let refresh = !matches!(self, Self::EarlyLeave)
            && (!record.is_online || record.last_seen_at.map_or(true, |seen| seen < now));
        if refresh {
            record.is_online = true;
            record.last_seen_at = Some(now);
        }

        match (milestone, refresh) {
            (true, _) => Applied::Milestone,
            (false, true) => Applied::Liveness,
            (false, false) => Applied::Unchanged,
        }
    }
}

/// Apply `milestone` to `student`'s record. `NOT_ENROLLED` if there is none.
pub fn write_milestone(
    ctx: &RelayContext,
    session: &SessionRecord,
    student: &UserId,
    milestone: Milestone,
    now: Timestamp,
) -> Result<(Applied, AttendanceRecord), RelayError> {
    for _ in 0..ctx.config.max_write_attempts.max(1) {
        let current = ctx
            .store
            .find_attendance(&session.id, student)?
            .ok_or_else(|| RelayError::NotEnrolled(student.to_string()))?;
        let mut next = current.value.clone();
        let applied = milestone.apply(&mut next, session, now);
        if applied == Applied::Unchanged {
            return Ok((applied, next));
        }
        match current.compare_and_swap(ctx.store.as_ref(), next) {
            Ok(written) => return Ok((applied, written.into_inner())),
            Err(e) if e.is_conflict() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(RelayError::VersionConflict)
}

/// [`write_milestone`] for side effects of a hop: failures are logged and
/// swallowed. Returns the updated record only when a milestone was set.
pub fn write_milestone_best_effort(
    ctx: &RelayContext,
    session: &SessionRecord,
    student: &UserId,
    milestone: Milestone,
    now: Timestamp,
) -> Option<AttendanceRecord> {
    match write_milestone(ctx, session, student, milestone, now) {
        Ok((Applied::Milestone, record)) => Some(record),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(
                session_id = %session.id,
                student_id = %student,
                milestone = ?milestone,
                error = %e,
                "milestone write failed; continuing"
            );
            None
        }
    }
}

/// Notification for a record whose milestone just changed.
pub fn milestone_event(record: &AttendanceRecord) -> SessionEvent {
    SessionEvent::Milestone {
        session_id: record.session_id.clone(),
        student_id: record.student_id.clone(),
        entry_status: record.entry_status,
        exit_verified: record.exit_verified.then_some(true),
        early_leave: record.early_leave_at.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_types::{SessionId, SessionStatus};

    fn session() -> SessionRecord {
        SessionRecord {
            id: SessionId::new("s1"),
            teacher_id: UserId::new("prof"),
            starts_at: Timestamp::from_secs(0),
            ends_at: Timestamp::from_secs(3_600),
            late_cutoff_minutes: 10,
            exit_window_minutes: 10,
            status: SessionStatus::Active,
            late_entry_active: false,
            current_late_token: None,
            early_leave_active: false,
            current_early_token: None,
            geofence: None,
            created_at: Timestamp::EPOCH,
        }
    }

    fn record() -> AttendanceRecord {
        AttendanceRecord::new(SessionId::new("s1"), UserId::new("ann"), Timestamp::EPOCH)
    }

    #[test]
    fn entry_is_present_until_cutoff_inclusive() {
        let s = session();
        let mut on_time = record();
        Milestone::Entry.apply(&mut on_time, &s, Timestamp::from_secs(600));
        assert_eq!(on_time.entry_status, Some(EntryStatus::PresentEntry));

        let mut late = record();
        Milestone::Entry.apply(&mut late, &s, Timestamp::from_millis(600_001));
        assert_eq!(late.entry_status, Some(EntryStatus::LateEntry));
    }

    #[test]
    fn milestones_are_never_overwritten() {
        let s = session();
        let mut r = record();
        assert_eq!(
            Milestone::Entry.apply(&mut r, &s, Timestamp::from_secs(1)),
            Applied::Milestone
        );
        let first_at = r.entry_at;
        assert_ne!(
            Milestone::LateEntry.apply(&mut r, &s, Timestamp::from_secs(2_000)),
            Applied::Milestone
        );
        assert_eq!(r.entry_status, Some(EntryStatus::PresentEntry));
        assert_eq!(r.entry_at, first_at);
    }

    #[test]
    fn snapshot_only_refreshes_liveness() {
        let s = session();
        let mut r = record();
        assert_eq!(
            Milestone::Snapshot.apply(&mut r, &s, Timestamp::from_secs(5)),
            Applied::Liveness
        );
        assert!(r.is_online);
        assert_eq!(r.entry_status, None);
        assert_eq!(
            Milestone::Snapshot.apply(&mut r, &s, Timestamp::from_secs(5)),
            Applied::Unchanged
        );
    }

    #[test]
    fn early_leave_needs_entry_and_no_exit() {
        let s = session();
        let mut r = record();
        assert_eq!(
            Milestone::EarlyLeave.apply(&mut r, &s, Timestamp::from_secs(5)),
            Applied::Unchanged
        );
        r.entry_status = Some(EntryStatus::PresentEntry);
        assert_eq!(
            Milestone::EarlyLeave.apply(&mut r, &s, Timestamp::from_secs(6)),
            Applied::Milestone
        );
        let mut verified = record();
        verified.entry_status = Some(EntryStatus::PresentEntry);
        verified.exit_verified = true;
        assert_eq!(
            Milestone::EarlyLeave.apply(&mut verified, &s, Timestamp::from_secs(6)),
            Applied::Unchanged
        );
    }
}
