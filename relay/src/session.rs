//! Session lifecycle: creation, enrollment, liveness, standalone windows,
//! ending and deletion.

use std::sync::Arc;

use baton_store::{
    AttendanceRecord, AttendanceRecordStore, ChainStore, HistoryStore, SessionRecord,
    SessionStore, TokenRecord, TokenStore, Versioned,
};
use baton_types::{
    Geofence, SessionEvent, SessionId, SessionStatus, StandaloneKind, Timestamp, TokenId,
    TokenStatus, UserId,
};
use serde::Serialize;

use crate::engine::ChainEngine;
use crate::milestone::{milestone_event, write_milestone, Applied, Milestone};
use crate::{RelayContext, RelayError};

/// Parameters for [`SessionManager::create_session`].
#[derive(Clone, Debug)]
pub struct NewSession {
    /// Generated when absent.
    pub id: Option<SessionId>,
    pub teacher_id: UserId,
    pub starts_at: Timestamp,
    pub ends_at: Timestamp,
    pub late_cutoff_minutes: u32,
    pub exit_window_minutes: u32,
    pub geofence: Option<Geofence>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StandaloneScan {
    pub kind: StandaloneKind,
    pub record: AttendanceRecord,
    /// False when the milestone was already set (the scan is idempotent).
    pub milestone_written: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EndSummary {
    pub chains_closed: usize,
    pub records_finalized: usize,
    pub already_ended: bool,
}

pub struct SessionManager {
    ctx: RelayContext,
    engine: Arc<ChainEngine>,
}

impl SessionManager {
    pub fn new(ctx: RelayContext, engine: Arc<ChainEngine>) -> Self {
        Self { ctx, engine }
    }

    pub fn create_session(&self, params: NewSession) -> Result<SessionRecord, RelayError> {
        if params.ends_at <= params.starts_at {
            return Err(RelayError::InvalidRequest(
                "session must end after it starts".to_string(),
            ));
        }
        if let Some(fence) = &params.geofence {
            if !fence.center.is_valid() || !fence.radius_m.is_finite() || fence.radius_m <= 0.0 {
                return Err(RelayError::InvalidRequest(
                    "geofence needs a valid centre and a positive radius".to_string(),
                ));
            }
        }
        let id = match params.id {
            Some(id) => id,
            None => SessionId::parse(self.ctx.random.identifier("ses-")?)?,
        };
        let session = SessionRecord {
            id,
            teacher_id: params.teacher_id,
            starts_at: params.starts_at,
            ends_at: params.ends_at,
            late_cutoff_minutes: params.late_cutoff_minutes,
            exit_window_minutes: params.exit_window_minutes,
            status: SessionStatus::Active,
            late_entry_active: false,
            current_late_token: None,
            early_leave_active: false,
            current_early_token: None,
            geofence: params.geofence,
            created_at: self.ctx.now(),
        };
        self.ctx.store.create_session(&session).map_err(|e| {
            if matches!(e, baton_store::StoreError::Duplicate(_)) {
                RelayError::InvalidRequest(format!("session {} already exists", session.id))
            } else {
                e.into()
            }
        })?;
        tracing::info!(session_id = %session.id, teacher_id = %session.teacher_id, "session created");
        Ok(session)
    }

    pub fn get_session(&self, id: &SessionId) -> Result<SessionRecord, RelayError> {
        Ok(self.ctx.load_session(id)?.into_inner())
    }

    /// Create the student's attendance record. Enrolling twice returns the
    /// existing record.
    pub fn enroll_student(
        &self,
        session_id: &SessionId,
        student: &UserId,
    ) -> Result<AttendanceRecord, RelayError> {
        self.ctx.load_active_session(session_id)?;
        if let Some(existing) = self.ctx.store.find_attendance(session_id, student)? {
            return Ok(existing.into_inner());
        }
        let record = AttendanceRecord::new(session_id.clone(), student.clone(), self.ctx.now());
        match self.ctx.store.create_attendance(&record) {
            Ok(created) => {
                tracing::debug!(session_id = %session_id, student_id = %student, "student enrolled");
                Ok(created.into_inner())
            }
            // Lost a race with a concurrent enrollment of the same student.
            Err(baton_store::StoreError::Duplicate(_)) => Ok(self
                .ctx
                .store
                .get_attendance(session_id, student)?
                .into_inner()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record liveness from the student's client.
    pub fn heartbeat(
        &self,
        session_id: &SessionId,
        student: &UserId,
        online: bool,
    ) -> Result<AttendanceRecord, RelayError> {
        self.ctx.load_active_session(session_id)?;
        let now = self.ctx.now();
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            let current = self
                .ctx
                .store
                .find_attendance(session_id, student)?
                .ok_or_else(|| RelayError::NotEnrolled(student.to_string()))?;
            let mut next = current.value.clone();
            next.is_online = online;
            if online {
                next.last_seen_at = Some(now);
            }
            match current.compare_and_swap(self.ctx.store.as_ref(), next) {
                Ok(written) => return Ok(written.into_inner()),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(RelayError::VersionConflict)
    }

    pub fn set_late_entry(
        &self,
        session_id: &SessionId,
        enabled: bool,
    ) -> Result<SessionRecord, RelayError> {
        self.set_window(session_id, StandaloneKind::LateEntry, enabled)
    }

    pub fn set_early_leave(
        &self,
        session_id: &SessionId,
        enabled: bool,
    ) -> Result<SessionRecord, RelayError> {
        self.set_window(session_id, StandaloneKind::EarlyLeave, enabled)
    }

    /// Open or close a standalone window. Opening mints the first token,
    /// held by the teacher; closing deletes the current one.
    pub fn set_window(
        &self,
        session_id: &SessionId,
        kind: StandaloneKind,
        enabled: bool,
    ) -> Result<SessionRecord, RelayError> {
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            let session = self.ctx.load_active_session(session_id)?;
            let (active, current) = session.window(kind);
            let current = current.cloned();
            if active == enabled && (!enabled || current.is_some()) {
                return Ok(session.into_inner());
            }

            let minted = if enabled {
                Some(self.mint_standalone(&session, kind)?)
            } else {
                None
            };
            let mut next = session.value.clone();
            next.set_window(kind, enabled, minted.as_ref().map(|t| t.token_id.clone()));

            match session.compare_and_swap(self.ctx.store.as_ref(), next) {
                Ok(written) => {
                    if let Some(old) = current {
                        self.ctx.store.delete_token(session_id, &old)?;
                    }
                    tracing::info!(
                        session_id = %session_id,
                        kind = %kind,
                        enabled,
                        "standalone window toggled"
                    );
                    self.ctx.publish(SessionEvent::WindowRotated {
                        session_id: session_id.clone(),
                        kind,
                        token_id: minted.map(|t| t.token_id),
                    });
                    return Ok(written.into_inner());
                }
                Err(e) => {
                    if let Some(token) = &minted {
                        self.ctx.store.delete_token(session_id, &token.token_id)?;
                    }
                    if !e.is_conflict() {
                        return Err(e.into());
                    }
                }
            }
        }
        Err(RelayError::VersionConflict)
    }

    fn mint_standalone(
        &self,
        session: &SessionRecord,
        kind: StandaloneKind,
    ) -> Result<TokenRecord, RelayError> {
        let now = self.ctx.now();
        let token = TokenRecord::standalone(
            session.id.clone(),
            self.ctx.new_token_id()?,
            kind,
            session.teacher_id.clone(),
            now,
            now.plus(self.ctx.config.standalone_token_ttl()),
        );
        self.ctx.store.create_token(&token)?;
        Ok(token)
    }

    /// A student scanned the projected late-entry or early-leave QR.
    pub fn scan_standalone(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
        student: &UserId,
    ) -> Result<StandaloneScan, RelayError> {
        let now = self.ctx.now();
        let token = self
            .ctx
            .store
            .find_token(session_id, token_id)?
            .ok_or_else(|| RelayError::TokenNotFound(token_id.to_string()))?;
        let Some(kind) = token.kind.as_standalone() else {
            return Err(RelayError::InvalidToken(
                "not a late-entry or early-leave token".to_string(),
            ));
        };
        match token.status {
            TokenStatus::Consumed => return Err(RelayError::TokenUsed),
            TokenStatus::Expired => return Err(RelayError::TokenExpired),
            TokenStatus::Active => {}
        }
        if token.is_expired(now) {
            return Err(RelayError::TokenExpired);
        }

        let session = self.ctx.load_active_session(session_id)?;
        let (enabled, pointer) = session.window(kind);
        if !enabled {
            return Err(RelayError::InvalidToken(format!("{kind} window is closed")));
        }
        if pointer != Some(token_id) {
            return Err(RelayError::InvalidToken(format!(
                "{kind} code was replaced; scan the one on screen now"
            )));
        }
        if kind == StandaloneKind::EarlyLeave {
            let record = self
                .ctx
                .store
                .find_attendance(session_id, student)?
                .ok_or_else(|| RelayError::NotEnrolled(student.to_string()))?;
            if record.entry_status.is_none() {
                return Err(RelayError::InvalidRequest(format!(
                    "{student} has no recorded entry, so there is nothing to leave early from"
                )));
            }
        }

        let (applied, record) =
            write_milestone(&self.ctx, &session, student, Milestone::for_standalone(kind), now)?;
        let milestone_written = applied == Applied::Milestone;
        if milestone_written {
            self.ctx.publish(milestone_event(&record));
        }
        tracing::info!(
            session_id = %session_id,
            student_id = %student,
            kind = %kind,
            milestone_written,
            "standalone scan"
        );
        Ok(StandaloneScan {
            kind,
            record,
            milestone_written,
        })
    }

    /// Close every open chain, retire standalone windows and compute final
    /// statuses. Ending an ended session is a no-op.
    pub fn end_session(&self, session_id: &SessionId) -> Result<EndSummary, RelayError> {
        let session = self.ctx.load_session(session_id)?;
        if session.is_ended() {
            return Ok(EndSummary {
                already_ended: true,
                ..EndSummary::default()
            });
        }

        let mut summary = EndSummary::default();
        for chain in self
            .ctx
            .store
            .list_chains(Some(session_id), &|c| c.state.accepts_hops())?
        {
            let outcome = self.engine.close_chain(session_id, &chain.chain_id)?;
            if !outcome.already_completed {
                summary.chains_closed += 1;
            }
        }

        for token in self
            .ctx
            .store
            .list_tokens(Some(session_id), &|t| t.kind.as_standalone().is_some())?
        {
            self.ctx.store.delete_token(session_id, &token.token_id)?;
        }

        // Closing chains wrote milestones; re-read the session after.
        let session = self.ctx.load_session(session_id)?;
        for record in self.ctx.store.session_attendance(session_id, &|_| true)? {
            self.finalize_record(&session, record)?;
            summary.records_finalized += 1;
        }

        let ended = self.mark_ended(session_id)?;
        tracing::info!(
            session_id = %session_id,
            chains_closed = summary.chains_closed,
            records = summary.records_finalized,
            "session ended"
        );
        self.ctx.publish(SessionEvent::SessionEnded {
            session_id: ended.id.clone(),
        });
        Ok(summary)
    }

    fn finalize_record(
        &self,
        session: &SessionRecord,
        mut record: Versioned<AttendanceRecord>,
    ) -> Result<(), RelayError> {
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            let mut next = record.value.clone();
            next.final_status = Some(next.compute_final_status(session));
            next.is_online = false;
            match record.compare_and_swap(self.ctx.store.as_ref(), next) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    record = self
                        .ctx
                        .store
                        .get_attendance(&record.session_id, &record.student_id)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RelayError::VersionConflict)
    }

    fn mark_ended(&self, session_id: &SessionId) -> Result<SessionRecord, RelayError> {
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            let session = self.ctx.load_session(session_id)?;
            let mut next = session.value.clone();
            next.status = SessionStatus::Ended;
            next.set_window(StandaloneKind::LateEntry, false, None);
            next.set_window(StandaloneKind::EarlyLeave, false, None);
            match session.compare_and_swap(self.ctx.store.as_ref(), next) {
                Ok(written) => return Ok(written.into_inner()),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(RelayError::VersionConflict)
    }

    /// Remove the session and everything keyed under it. The scan log is
    /// kept.
    pub fn delete_session(&self, session_id: &SessionId) -> Result<(), RelayError> {
        self.ctx.load_session(session_id)?;
        let store = &self.ctx.store;

        for token in store.list_tokens(Some(session_id), &|_| true)? {
            store.delete_token(session_id, &token.token_id)?;
        }
        for entry in store.session_history(session_id)? {
            store.delete_history(&entry)?;
        }
        for chain in store.list_chains(Some(session_id), &|_| true)? {
            store.delete_chain(session_id, &chain.chain_id)?;
        }
        for record in store.session_attendance(session_id, &|_| true)? {
            store.delete_attendance(session_id, &record.student_id)?;
        }
        store.delete_session(session_id)?;
        tracing::info!(session_id = %session_id, "session deleted");
        Ok(())
    }

    pub fn attendance(&self, session_id: &SessionId) -> Result<Vec<AttendanceRecord>, RelayError> {
        self.ctx.load_session(session_id)?;
        Ok(self
            .ctx
            .store
            .session_attendance(session_id, &|_| true)?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    pub fn list_sessions(&self, teacher: Option<&UserId>) -> Result<Vec<SessionRecord>, RelayError> {
        Ok(self
            .ctx
            .store
            .list_sessions(&|s| teacher.map_or(true, |t| s.teacher_id == *t))?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }
}
