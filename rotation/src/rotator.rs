//! Applies planned rotation actions.
//!
//! Each action is one unit of work. A unit that loses a conditional write
//! is counted as a conflict and dropped; any other failure is logged and
//! counted. Neither stops the pass.

use baton_relay::{RelayContext, RelayError};
use baton_store::{
    ChainRecord, ChainStore, SessionRecord, SessionStore, StoreError, TokenRecord, TokenStore,
    Versioned,
};
use baton_types::{ChainState, SessionEvent, StandaloneKind, Timestamp, TokenId, TokenStatus};
use serde::Serialize;

use crate::plan::{plan, RotationAction, SessionSnapshot};
use crate::RotationConfig;

/// Counts from one rotation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Replacement chain tokens plus new standalone tokens.
    pub created: usize,
    pub expired: usize,
    pub stalled: usize,
    pub purged: usize,
    /// Units dropped because a concurrent writer got there first.
    pub conflicts: usize,
    pub failures: usize,
}

impl RotationReport {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

enum UnitError {
    Conflict,
    Failed(RelayError),
}

impl From<StoreError> for UnitError {
    fn from(e: StoreError) -> Self {
        if e.is_conflict() || e.is_not_found() {
            Self::Conflict
        } else {
            Self::Failed(e.into())
        }
    }
}

impl From<RelayError> for UnitError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::VersionConflict => Self::Conflict,
            other => Self::Failed(other),
        }
    }
}

pub struct Rotator {
    ctx: RelayContext,
    config: RotationConfig,
}

impl Rotator {
    pub fn new(ctx: RelayContext, config: RotationConfig) -> Self {
        Self { ctx, config }
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Run one pass at the context clock's current time.
    pub fn rotate(&self) -> RotationReport {
        self.rotate_at(self.ctx.now())
    }

    pub fn rotate_at(&self, now: Timestamp) -> RotationReport {
        let mut report = RotationReport::default();
        let sessions = match self.ctx.store.list_sessions(&|s| !s.is_ended()) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(error = %e, "rotation could not list sessions");
                report.failures += 1;
                return report;
            }
        };

        for session in sessions {
            let snapshot = match self.snapshot(session) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "rotation could not read session rows");
                    report.failures += 1;
                    continue;
                }
            };
            for action in plan(now, &snapshot, &self.config) {
                let label = action.label();
                match self.apply(&action, now, &mut report) {
                    Ok(()) => {}
                    Err(UnitError::Conflict) => {
                        tracing::debug!(
                            session_id = %snapshot.session.id,
                            action = label,
                            "rotation unit lost a race; dropped"
                        );
                        report.conflicts += 1;
                    }
                    Err(UnitError::Failed(e)) => {
                        tracing::warn!(
                            session_id = %snapshot.session.id,
                            action = label,
                            error = %e,
                            "rotation unit failed"
                        );
                        report.failures += 1;
                    }
                }
            }
        }

        if !report.is_quiet() {
            tracing::debug!(
                created = report.created,
                expired = report.expired,
                stalled = report.stalled,
                purged = report.purged,
                conflicts = report.conflicts,
                failures = report.failures,
                "rotation pass"
            );
        }
        report
    }

    fn snapshot(&self, session: Versioned<SessionRecord>) -> Result<SessionSnapshot, StoreError> {
        let chains = self.ctx.store.list_chains(Some(&session.id), &|_| true)?;
        let tokens = self.ctx.store.list_tokens(Some(&session.id), &|_| true)?;
        Ok(SessionSnapshot {
            session,
            chains,
            tokens,
        })
    }

    fn apply(
        &self,
        action: &RotationAction,
        now: Timestamp,
        report: &mut RotationReport,
    ) -> Result<(), UnitError> {
        match action {
            RotationAction::MaintainChain {
                chain,
                stall,
                reissue,
                replaces,
            } => {
                if *stall {
                    let stalled = ChainRecord {
                        state: ChainState::Stalled,
                        ..chain.value.clone()
                    };
                    chain.compare_and_swap(self.ctx.store.as_ref(), stalled)?;
                    report.stalled += 1;
                }
                if *reissue {
                    if let Some(old) = replaces {
                        if self.retire_chain_token(old, now)? == TokenStatus::Expired {
                            report.expired += 1;
                        }
                    }
                    self.reissue_chain_token(chain, now)?;
                    report.created += 1;
                }
                Ok(())
            }
            RotationAction::RotateWindows { session, kinds } => {
                report.created += self.rotate_windows(session, kinds, now)?;
                Ok(())
            }
            RotationAction::Expire { token } => {
                token.compare_and_swap(
                    self.ctx.store.as_ref(),
                    token.with_status(TokenStatus::Expired),
                )?;
                report.expired += 1;
                Ok(())
            }
            RotationAction::Purge { token } => {
                if token.delete_if_unchanged(self.ctx.store.as_ref())? {
                    report.purged += 1;
                }
                Ok(())
            }
        }
    }

    /// Take a chain's outgoing token out of play before its replacement
    /// exists, so the chain never has two live tokens. A pending challenge
    /// on it is cancelled; a hop that already spent it wins and the reissue
    /// is dropped.
    fn retire_chain_token(
        &self,
        old: &Versioned<TokenRecord>,
        now: Timestamp,
    ) -> Result<TokenStatus, UnitError> {
        let status = if old.is_expired(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Consumed
        };
        let mut seen = old.clone();
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            match seen.compare_and_swap(self.ctx.store.as_ref(), seen.with_status(status)) {
                Ok(_) => return Ok(status),
                Err(e) if e.is_conflict() => {
                    match self.ctx.store.find_token(&old.session_id, &old.token_id)? {
                        // Only a challenge was requested since the snapshot.
                        Some(fresh) if fresh.status == TokenStatus::Active => seen = fresh,
                        _ => return Err(UnitError::Conflict),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(UnitError::Conflict)
    }

    /// Give the chain's holder a fresh token at the same sequence number.
    /// No history row is written: possession did not change.
    fn reissue_chain_token(
        &self,
        planned: &Versioned<ChainRecord>,
        now: Timestamp,
    ) -> Result<(), UnitError> {
        let token = TokenRecord::chain(
            planned.session_id.clone(),
            self.ctx.new_token_id()?,
            planned.chain_id.clone(),
            planned.last_seq,
            planned.last_holder.clone(),
            now,
            now.plus(self.ctx.config.chain_token_ttl()),
        );
        self.ctx.store.create_token(&token)?;

        // A hop or close may have landed since the snapshot; a replacement
        // for a stale position must not survive.
        let current = self
            .ctx
            .store
            .find_chain(&planned.session_id, &planned.chain_id)?;
        let still_current = current.as_ref().is_some_and(|c| {
            c.state.accepts_hops()
                && c.last_seq == planned.last_seq
                && c.last_holder == planned.last_holder
        });
        if !still_current {
            self.ctx
                .store
                .delete_token(&token.session_id, &token.token_id)?;
            return Err(UnitError::Conflict);
        }

        tracing::debug!(
            session_id = %token.session_id,
            chain_id = %planned.chain_id,
            holder = %token.holder_id,
            seq = planned.last_seq,
            "chain token reissued"
        );
        Ok(())
    }

    fn rotate_windows(
        &self,
        session: &Versioned<SessionRecord>,
        kinds: &[StandaloneKind],
        now: Timestamp,
    ) -> Result<usize, UnitError> {
        let mut next = session.value.clone();
        let mut minted = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let token = TokenRecord::standalone(
                session.id.clone(),
                self.ctx.new_token_id()?,
                kind,
                session.teacher_id.clone(),
                now,
                now.plus(self.ctx.config.standalone_token_ttl()),
            );
            if let Err(e) = self.ctx.store.create_token(&token) {
                self.discard(&minted);
                return Err(e.into());
            }
            next.set_window(kind, true, Some(token.token_id.clone()));
            minted.push(token);
        }

        if let Err(e) = session.compare_and_swap(self.ctx.store.as_ref(), next) {
            self.discard(&minted);
            return Err(e.into());
        }
        for &kind in kinds {
            if let (_, Some(old)) = session.window(kind) {
                self.expire_superseded(session, old);
            }
        }

        for token in &minted {
            if let Some(kind) = token.kind.as_standalone() {
                self.ctx.publish(SessionEvent::WindowRotated {
                    session_id: session.id.clone(),
                    kind,
                    token_id: Some(token.token_id.clone()),
                });
            }
        }
        tracing::debug!(session_id = %session.id, windows = minted.len(), "standalone tokens rotated");
        Ok(minted.len())
    }

    /// Mark a window's previous token expired once the session no longer
    /// points at it. Scans already refuse it, so a failure here is logged
    /// and left for the purge.
    fn expire_superseded(&self, session: &SessionRecord, token_id: &TokenId) {
        let result = self
            .ctx
            .store
            .find_token(&session.id, token_id)
            .and_then(|found| match found {
                Some(token) if token.status == TokenStatus::Active => token
                    .compare_and_swap(
                        self.ctx.store.as_ref(),
                        token.with_status(TokenStatus::Expired),
                    )
                    .map(|_| ()),
                _ => Ok(()),
            });
        if let Err(e) = result {
            tracing::warn!(
                session_id = %session.id,
                token_id = %token_id,
                error = %e,
                "failed to expire superseded window token"
            );
        }
    }

    fn discard(&self, minted: &[TokenRecord]) {
        for token in minted {
            if let Err(e) = self.ctx.store.delete_token(&token.session_id, &token.token_id) {
                tracing::warn!(token_id = %token.token_id, error = %e, "failed to discard minted token");
            }
        }
    }
}
