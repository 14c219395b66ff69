//! Chain seeding, hops, teacher overrides and closure.
//!
//! Every state change goes through conditional writes. A hop first claims
//! its history row, which is keyed by sequence number, then consumes the
//! token and advances the chain. Of two scans racing on one token exactly
//! one gets past these steps, and a hop that fails partway is rolled back
//! so the history always ends at the chain's current sequence.

use std::collections::HashSet;
use std::sync::Arc;

use baton_store::{
    AttendanceRecordStore, ChainRecord, ChainStore, Etag, HistoryEntry, HistoryStore, HopKind,
    StoreError, TokenRecord, TokenStore, Versioned,
};
use baton_types::{
    ChainId, ChainState, Phase, SessionEvent, SessionId, Timestamp, TokenId, TokenStatus, UserId,
    TEACHER_ORIGIN,
};
use serde::Serialize;

use crate::challenge::ChallengeVerifier;
use crate::context::token_write_error;
use crate::milestone::{milestone_event, write_milestone_best_effort, Milestone};
use crate::selection::select_students;
use crate::{RelayContext, RelayError};

/// A holder completing a hop by entering the scanner's code.
#[derive(Clone, Debug)]
pub struct HopRequest {
    pub session_id: SessionId,
    pub token_id: TokenId,
    /// Token version the client last saw; a mismatch is a conflict.
    pub etag: Option<Etag>,
    pub code: String,
    pub requester: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HopOutcome {
    pub chain_id: ChainId,
    pub phase: Phase,
    pub new_holder: UserId,
    pub seq: u64,
    /// The new holder's live token.
    pub token_id: TokenId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CloseOutcome {
    pub chain_id: ChainId,
    pub final_holder: UserId,
    pub seq: u64,
    /// The chain was already completed; nothing changed.
    pub already_completed: bool,
}

pub struct ChainEngine {
    ctx: RelayContext,
    verifier: Arc<ChallengeVerifier>,
}

impl ChainEngine {
    pub fn new(ctx: RelayContext, verifier: Arc<ChallengeVerifier>) -> Self {
        Self { ctx, verifier }
    }

    pub fn context(&self) -> &RelayContext {
        &self.ctx
    }

    pub fn verifier(&self) -> &ChallengeVerifier {
        &self.verifier
    }

    /// Start `count` chains for `phase`. Fails if that phase already has
    /// open chains; use [`reseed_chains`](Self::reseed_chains) to add more.
    pub fn seed_chains(
        &self,
        session_id: &SessionId,
        phase: Phase,
        count: usize,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        self.seed_round(session_id, phase, count, false)
    }

    /// Start `count` more chains for `phase` alongside any still open.
    pub fn reseed_chains(
        &self,
        session_id: &SessionId,
        phase: Phase,
        count: usize,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        self.seed_round(session_id, phase, count, true)
    }

    fn seed_round(
        &self,
        session_id: &SessionId,
        phase: Phase,
        count: usize,
        reseed: bool,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        if count == 0 {
            return Err(RelayError::InvalidRequest(
                "chain count must be at least 1".to_string(),
            ));
        }
        let now = self.ctx.now();
        self.ctx.load_active_session(session_id)?;

        let existing = self
            .ctx
            .store
            .list_chains(Some(session_id), &|c| c.phase == phase)?;
        let open: Vec<&Versioned<ChainRecord>> =
            existing.iter().filter(|c| c.state.accepts_hops()).collect();
        if !reseed && !open.is_empty() {
            return Err(RelayError::InvalidRequest(format!(
                "{phase} chains are already running; reseed to add more"
            )));
        }
        let seed_index = existing
            .iter()
            .map(|c| c.seed_index + 1)
            .max()
            .unwrap_or(0);

        // A student already holding an open chain of this phase is not seeded twice.
        let busy: HashSet<&UserId> = open.iter().map(|c| &c.last_holder).collect();
        let eligible: Vec<UserId> = self
            .ctx
            .store
            .session_attendance(session_id, &|r| r.eligible_for(phase))?
            .into_iter()
            .map(|r| r.into_inner().student_id)
            .filter(|id| !busy.contains(id))
            .collect();

        if eligible.is_empty() {
            return Err(RelayError::NoStudents);
        }
        if eligible.len() < count {
            return Err(RelayError::InsufficientStudents {
                requested: count,
                available: eligible.len(),
            });
        }

        let seed = self.ctx.random.seed()?;
        let holders = select_students(&seed, &eligible, count);

        let mut chains = Vec::with_capacity(holders.len());
        for holder in holders {
            let chain = ChainRecord {
                session_id: session_id.clone(),
                chain_id: self.ctx.new_chain_id(phase, seed_index)?,
                phase,
                seed_index,
                state: ChainState::Active,
                last_holder: holder.clone(),
                last_seq: 0,
                last_at: now,
                created_at: now,
            };
            self.start_chain(&chain, now)?;
            self.ctx.publish(chain_event(&chain));
            chains.push(chain);
        }

        tracing::info!(
            session_id = %session_id,
            phase = %phase,
            seed_index,
            count = chains.len(),
            reseed,
            "chains seeded"
        );
        Ok(chains)
    }

    /// Write a freshly seeded chain: history row 0, the chain, then its
    /// first token. A failed step removes whatever was already written.
    fn start_chain(&self, chain: &ChainRecord, now: Timestamp) -> Result<(), RelayError> {
        let entry = HistoryEntry {
            session_id: chain.session_id.clone(),
            chain_id: chain.chain_id.clone(),
            sequence: 0,
            from_holder: TEACHER_ORIGIN.to_string(),
            to_holder: chain.last_holder.clone(),
            scanned_at: now,
            phase: chain.phase,
            kind: HopKind::Seed,
        };
        self.claim_history(&entry)?;
        if let Err(e) = self.ctx.store.create_chain(chain) {
            self.release_history(&entry);
            return Err(e.into());
        }
        if let Err(e) = self.issue_chain_token(chain, now) {
            if let Err(cleanup) = self.ctx.store.delete_chain(&chain.session_id, &chain.chain_id) {
                tracing::warn!(
                    chain_id = %chain.chain_id,
                    error = %cleanup,
                    "failed to remove half-seeded chain"
                );
            }
            self.release_history(&entry);
            return Err(e);
        }
        Ok(())
    }

    /// Claim the history row for a hop. The row key includes the sequence
    /// number, so a second writer for the same hop gets a conflict.
    fn claim_history(&self, entry: &HistoryEntry) -> Result<(), RelayError> {
        self.ctx.store.append_history(entry).map_err(|e| match e {
            StoreError::Duplicate(_) => RelayError::VersionConflict,
            other => other.into(),
        })
    }

    /// Undo [`claim_history`](Self::claim_history) after a later step failed.
    fn release_history(&self, entry: &HistoryEntry) {
        if let Err(e) = self.ctx.store.delete_history(entry) {
            tracing::warn!(
                chain_id = %entry.chain_id,
                seq = entry.sequence,
                error = %e,
                "failed to remove history row of an abandoned hop"
            );
        }
    }

    fn discard_token(&self, token: &TokenRecord) {
        if let Err(e) = self.ctx.store.delete_token(&token.session_id, &token.token_id) {
            tracing::warn!(
                token_id = %token.token_id,
                error = %e,
                "failed to remove orphaned successor token"
            );
        }
    }

    /// Mint the live token for `chain`'s current holder and sequence.
    fn issue_chain_token(
        &self,
        chain: &ChainRecord,
        now: Timestamp,
    ) -> Result<TokenRecord, RelayError> {
        let token = TokenRecord::chain(
            chain.session_id.clone(),
            self.ctx.new_token_id()?,
            chain.chain_id.clone(),
            chain.last_seq,
            chain.last_holder.clone(),
            now,
            now.plus(self.ctx.config.chain_token_ttl()),
        );
        self.ctx.store.create_token(&token)?;
        Ok(token)
    }

    /// Complete a hop: the holder entered the scanner's challenge code.
    pub fn process_chain_scan(&self, req: &HopRequest) -> Result<HopOutcome, RelayError> {
        let now = self.ctx.now();
        let (token, chain) = self
            .ctx
            .load_hop_target(&req.session_id, &req.token_id, now)?;
        if let Some(expected) = req.etag {
            if expected != token.etag {
                return Err(RelayError::VersionConflict);
            }
        }
        let session = self.ctx.load_active_session(&req.session_id)?;
        let new_holder = self
            .verifier
            .check(&token, &req.code, &req.requester, now)?;

        let previous = token.holder_id.clone();
        let advanced = chain.advanced(new_holder.clone(), now);
        let entry = HistoryEntry {
            session_id: req.session_id.clone(),
            chain_id: chain.chain_id.clone(),
            sequence: advanced.last_seq,
            from_holder: previous.to_string(),
            to_holder: new_holder.clone(),
            scanned_at: now,
            phase: chain.phase,
            kind: HopKind::Scan,
        };
        self.claim_history(&entry)?;

        if let Err(e) = token.compare_and_swap(
            self.ctx.store.as_ref(),
            token.with_status(TokenStatus::Consumed),
        ) {
            self.release_history(&entry);
            return Err(token_write_error(e, &req.token_id));
        }

        let (chain_after, successor) = self.commit_hop(&chain, advanced, &entry, now)?;

        // The hop has landed; the previous holder's milestone rides along.
        let milestone = write_milestone_best_effort(
            &self.ctx,
            &session,
            &previous,
            Milestone::for_phase(chain_after.phase),
            now,
        );

        tracing::info!(
            session_id = %req.session_id,
            chain_id = %chain_after.chain_id,
            from = %previous,
            to = %new_holder,
            seq = chain_after.last_seq,
            "chain hop"
        );

        self.ctx.publish(chain_event(&chain_after));
        if let Some(record) = milestone {
            self.ctx.publish(milestone_event(&record));
        }

        Ok(HopOutcome {
            chain_id: chain_after.chain_id.clone(),
            phase: chain_after.phase,
            new_holder,
            seq: chain_after.last_seq,
            token_id: successor.token_id,
        })
    }

    /// Issue the new holder's token and conditionally write the advanced
    /// chain. On failure the successor token and the claimed history row
    /// are removed so neither outruns the chain.
    fn commit_hop(
        &self,
        current: &Versioned<ChainRecord>,
        advanced: ChainRecord,
        entry: &HistoryEntry,
        now: Timestamp,
    ) -> Result<(ChainRecord, TokenRecord), RelayError> {
        let successor = match self.issue_chain_token(&advanced, now) {
            Ok(token) => token,
            Err(e) => {
                self.release_history(entry);
                return Err(e);
            }
        };
        match current.compare_and_swap(self.ctx.store.as_ref(), advanced) {
            Ok(written) => Ok((written.into_inner(), successor)),
            Err(e) => {
                self.discard_token(&successor);
                self.release_history(entry);
                if e.is_conflict() || e.is_not_found() {
                    Err(RelayError::VersionConflict)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Teacher override: hand the chain to `student` without a challenge.
    pub fn set_chain_holder(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
        student: &UserId,
    ) -> Result<HopOutcome, RelayError> {
        let now = self.ctx.now();
        self.ctx.load_active_session(session_id)?;
        let chain = self.ctx.load_chain(session_id, chain_id)?;
        if !chain.state.accepts_hops() {
            return Err(RelayError::InvalidRequest(format!(
                "chain {chain_id} is completed"
            )));
        }
        if *student == chain.last_holder {
            return Err(RelayError::InvalidRequest(format!(
                "{student} already holds chain {chain_id}"
            )));
        }
        if self.ctx.store.find_attendance(session_id, student)?.is_none() {
            return Err(RelayError::NotEnrolled(student.to_string()));
        }

        let previous = chain.last_holder.clone();
        let advanced = chain.advanced(student.clone(), now);
        let entry = HistoryEntry {
            session_id: session_id.clone(),
            chain_id: chain_id.clone(),
            sequence: advanced.last_seq,
            from_holder: previous.to_string(),
            to_holder: student.clone(),
            scanned_at: now,
            phase: chain.phase,
            kind: HopKind::Override,
        };
        self.claim_history(&entry)?;

        let live_tokens = match self.ctx.store.tokens_for_chain(session_id, chain_id) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.release_history(&entry);
                return Err(e.into());
            }
        };
        for live in live_tokens
            .into_iter()
            .filter(|t| t.status == TokenStatus::Active)
        {
            let consumed = live.with_status(TokenStatus::Consumed);
            if let Err(e) = live.compare_and_swap(self.ctx.store.as_ref(), consumed) {
                self.release_history(&entry);
                return Err(token_write_error(e, &live.token_id));
            }
        }

        let (chain_after, successor) = self.commit_hop(&chain, advanced, &entry, now)?;

        tracing::info!(
            session_id = %session_id,
            chain_id = %chain_id,
            from = %previous,
            to = %student,
            seq = chain_after.last_seq,
            "chain holder overridden"
        );
        self.ctx.publish(chain_event(&chain_after));

        Ok(HopOutcome {
            chain_id: chain_id.clone(),
            phase: chain_after.phase,
            new_holder: student.clone(),
            seq: chain_after.last_seq,
            token_id: successor.token_id,
        })
    }

    /// Complete a chain: mark the final holder's milestone and delete every
    /// token the chain ever had. Calling it again is a no-op.
    pub fn close_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<CloseOutcome, RelayError> {
        let now = self.ctx.now();
        let session = self.ctx.load_session(session_id)?;

        let mut closed = None;
        for _ in 0..self.ctx.config.max_write_attempts.max(1) {
            let chain = self.ctx.load_chain(session_id, chain_id)?;
            if chain.state == ChainState::Completed {
                self.delete_chain_tokens(session_id, chain_id)?;
                return Ok(CloseOutcome {
                    chain_id: chain_id.clone(),
                    final_holder: chain.last_holder.clone(),
                    seq: chain.last_seq,
                    already_completed: true,
                });
            }
            let completed = ChainRecord {
                state: ChainState::Completed,
                ..chain.value.clone()
            };
            match chain.compare_and_swap(self.ctx.store.as_ref(), completed) {
                Ok(written) => {
                    closed = Some(written.into_inner());
                    break;
                }
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let chain = closed.ok_or(RelayError::VersionConflict)?;

        let milestone = write_milestone_best_effort(
            &self.ctx,
            &session,
            &chain.last_holder,
            Milestone::for_phase(chain.phase),
            now,
        );
        self.delete_chain_tokens(session_id, chain_id)?;

        tracing::info!(
            session_id = %session_id,
            chain_id = %chain_id,
            final_holder = %chain.last_holder,
            seq = chain.last_seq,
            "chain closed"
        );
        self.ctx.publish(chain_event(&chain));
        if let Some(record) = milestone {
            self.ctx.publish(milestone_event(&record));
        }

        Ok(CloseOutcome {
            chain_id: chain_id.clone(),
            final_holder: chain.last_holder,
            seq: chain.last_seq,
            already_completed: false,
        })
    }

    fn delete_chain_tokens(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<usize, RelayError> {
        let tokens = self.ctx.store.tokens_for_chain(session_id, chain_id)?;
        let mut deleted = 0;
        for token in &tokens {
            if self.ctx.store.delete_token(session_id, &token.token_id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn get_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<ChainRecord, RelayError> {
        Ok(self.ctx.load_chain(session_id, chain_id)?.into_inner())
    }

    pub fn list_chains(
        &self,
        session_id: &SessionId,
        phase: Option<Phase>,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        self.ctx.load_session(session_id)?;
        let chains = self
            .ctx
            .store
            .list_chains(Some(session_id), &|c| phase.map_or(true, |p| c.phase == p))?;
        Ok(chains.into_iter().map(Versioned::into_inner).collect())
    }

    pub fn chain_history(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Vec<HistoryEntry>, RelayError> {
        self.ctx.load_chain(session_id, chain_id)?;
        Ok(self.ctx.store.chain_history(session_id, chain_id)?)
    }

    /// The holder's live token, for rendering the QR code.
    pub fn current_token(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Versioned<TokenRecord>, RelayError> {
        let now = self.ctx.now();
        let chain = self.ctx.load_chain(session_id, chain_id)?;
        self.ctx
            .store
            .tokens_for_chain(session_id, chain_id)?
            .into_iter()
            .filter(|t| t.is_live(now) && t.chain_seq() == Some(chain.last_seq))
            .max_by_key(|t| t.issued_at)
            .ok_or_else(|| RelayError::TokenNotFound(format!("no live token for chain {chain_id}")))
    }
}

pub(crate) fn chain_event(chain: &ChainRecord) -> SessionEvent {
    SessionEvent::ChainUpdated {
        session_id: chain.session_id.clone(),
        chain_id: chain.chain_id.clone(),
        phase: chain.phase,
        last_holder: chain.last_holder.clone(),
        last_seq: chain.last_seq,
        state: chain.state,
    }
}
