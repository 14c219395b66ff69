//! The request-facing facade over the relay engines.
//!
//! [`BatonService`] is what the HTTP layer calls. It authorizes the caller,
//! runs scan-path requests through the gatekeeper (rate limit, location,
//! audit row), delegates to the engines and records metrics. Every method
//! is synchronous; async callers go through `spawn_blocking`.

use std::sync::Arc;
use std::time::Instant;

use baton_gatekeeper::{
    Gatekeeper, GatekeeperConfig, LocationVerdict, RateDecision, ScanAttempt, ScanContext,
};
use baton_relay::authorize::{
    require_self_or_teacher, require_session_teacher, require_student, require_teacher,
};
use baton_relay::{
    ChainEngine, ChallengeIssued, ChallengeVerifier, CloseOutcome, EndSummary, HopOutcome,
    HopRequest, NewSession, RelayContext, RelayError, SessionManager, StandaloneScan,
};
use baton_rotation::{RotationConfig, RotationReport, Rotator};
use baton_store::{
    AttendanceRecord, AttendanceRecordStore, ChainRecord, Etag, HistoryEntry, ScanLogEntry,
    ScanLogStore, ScanOperation, SessionRecord,
};
use baton_types::{
    ChainId, Identity, Phase, Role, SessionId, StandaloneKind, Timestamp, TokenId, UserId,
};
use serde::Serialize;

use crate::metrics::NodeMetrics;
use crate::tracing_spans::{rotation_span, scan_span, session_span};

/// What a chain holder's client needs to render the QR code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LiveToken {
    pub session_id: SessionId,
    pub chain_id: ChainId,
    pub token_id: TokenId,
    pub holder_id: UserId,
    pub seq: u64,
    pub expires_at: Timestamp,
    pub etag: Etag,
}

/// Location findings carried into the audit row.
#[derive(Default)]
struct AuditNotes {
    warnings: Vec<String>,
    distance_m: Option<f64>,
}

pub struct BatonService {
    ctx: RelayContext,
    verifier: Arc<ChallengeVerifier>,
    engine: Arc<ChainEngine>,
    sessions: SessionManager,
    rotator: Rotator,
    gatekeeper: Gatekeeper,
    metrics: Arc<NodeMetrics>,
}

impl BatonService {
    pub fn new(
        ctx: RelayContext,
        challenge_key: Vec<u8>,
        rotation: RotationConfig,
        gatekeeper: GatekeeperConfig,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        let verifier = Arc::new(ChallengeVerifier::new(ctx.clone(), challenge_key));
        let engine = Arc::new(ChainEngine::new(ctx.clone(), verifier.clone()));
        Self {
            sessions: SessionManager::new(ctx.clone(), engine.clone()),
            rotator: Rotator::new(ctx.clone(), rotation),
            gatekeeper: Gatekeeper::new(gatekeeper, ctx.store.clone(), ctx.random.clone()),
            ctx,
            verifier,
            engine,
            metrics,
        }
    }

    pub fn context(&self) -> &RelayContext {
        &self.ctx
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn rotation_config(&self) -> &RotationConfig {
        self.rotator.config()
    }

    // ── Access checks ───────────────────────────────────────────────────

    fn owned_session(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<SessionRecord, RelayError> {
        let session = self.sessions.get_session(session_id)?;
        require_session_teacher(identity, &session)?;
        Ok(session)
    }

    fn require_enrolled(&self, session_id: &SessionId, student: &UserId) -> Result<(), RelayError> {
        match self.ctx.store.find_attendance(session_id, student)? {
            Some(_) => Ok(()),
            None => Err(RelayError::NotEnrolled(student.to_string())),
        }
    }

    /// The owning teacher, or a student enrolled in the session.
    fn visible_session(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<SessionRecord, RelayError> {
        let session = self.sessions.get_session(session_id)?;
        match identity.role {
            Role::Teacher => require_session_teacher(identity, &session)?,
            Role::Student => self.require_enrolled(session_id, &identity.id)?,
        }
        Ok(session)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Create a session owned by the calling teacher. `params.teacher_id`
    /// is replaced by the caller's id.
    pub fn create_session(
        &self,
        identity: &Identity,
        mut params: NewSession,
    ) -> Result<SessionRecord, RelayError> {
        require_teacher(identity)?;
        params.teacher_id = identity.id.clone();
        let session = self.sessions.create_session(params)?;
        tracing::info!(session_id = %session.id, teacher = %session.teacher_id, "session created");
        Ok(session)
    }

    pub fn get_session(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<SessionRecord, RelayError> {
        self.visible_session(identity, session_id)
    }

    /// Teachers see the sessions they own; students the ones they are
    /// enrolled in.
    pub fn list_sessions(&self, identity: &Identity) -> Result<Vec<SessionRecord>, RelayError> {
        match identity.role {
            Role::Teacher => self.sessions.list_sessions(Some(&identity.id)),
            Role::Student => {
                let mut visible = Vec::new();
                for session in self.sessions.list_sessions(None)? {
                    if self
                        .ctx
                        .store
                        .find_attendance(&session.id, &identity.id)?
                        .is_some()
                    {
                        visible.push(session);
                    }
                }
                Ok(visible)
            }
        }
    }

    pub fn end_session(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<EndSummary, RelayError> {
        let _span = session_span("end", session_id.as_str()).entered();
        self.owned_session(identity, session_id)?;
        let summary = self.sessions.end_session(session_id)?;
        self.metrics
            .chains_closed_total
            .inc_by(summary.chains_closed as u64);
        Ok(summary)
    }

    pub fn delete_session(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<(), RelayError> {
        let _span = session_span("delete", session_id.as_str()).entered();
        self.owned_session(identity, session_id)?;
        self.sessions.delete_session(session_id)
    }

    /// A student enrolls themselves, or the teacher enrolls them.
    pub fn enroll_student(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        student: &UserId,
    ) -> Result<AttendanceRecord, RelayError> {
        let session = self.sessions.get_session(session_id)?;
        require_self_or_teacher(identity, student, &session)?;
        self.sessions.enroll_student(session_id, student)
    }

    pub fn heartbeat(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        online: bool,
    ) -> Result<AttendanceRecord, RelayError> {
        require_student(identity)?;
        self.sessions.heartbeat(session_id, &identity.id, online)
    }

    /// All records for the teacher; only their own for a student.
    pub fn attendance(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<Vec<AttendanceRecord>, RelayError> {
        self.visible_session(identity, session_id)?;
        let records = self.sessions.attendance(session_id)?;
        Ok(match identity.role {
            Role::Teacher => records,
            Role::Student => records
                .into_iter()
                .filter(|r| r.student_id == identity.id)
                .collect(),
        })
    }

    pub fn set_window(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        kind: StandaloneKind,
        enabled: bool,
    ) -> Result<SessionRecord, RelayError> {
        let _span = session_span(kind.as_str(), session_id.as_str()).entered();
        self.owned_session(identity, session_id)?;
        self.sessions.set_window(session_id, kind, enabled)
    }

    /// The session's audit trail, oldest first.
    pub fn scan_log(
        &self,
        identity: &Identity,
        session_id: &SessionId,
    ) -> Result<Vec<ScanLogEntry>, RelayError> {
        self.owned_session(identity, session_id)?;
        Ok(self.ctx.store.scan_log(session_id)?)
    }

    // ── Chains ──────────────────────────────────────────────────────────

    /// Seed a first round of chains, or with `reseed` add another round
    /// next to the open ones.
    pub fn seed_chains(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        phase: Phase,
        count: usize,
        reseed: bool,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        let _span = session_span(if reseed { "reseed" } else { "seed" }, session_id.as_str())
            .entered();
        self.owned_session(identity, session_id)?;
        let chains = if reseed {
            self.engine.reseed_chains(session_id, phase, count)?
        } else {
            self.engine.seed_chains(session_id, phase, count)?
        };
        self.metrics.chains_seeded_total.inc_by(chains.len() as u64);
        tracing::info!(phase = phase.as_str(), chains = chains.len(), "chains seeded");
        Ok(chains)
    }

    pub fn set_chain_holder(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        chain_id: &ChainId,
        student: &UserId,
    ) -> Result<HopOutcome, RelayError> {
        let _span = session_span("override", session_id.as_str()).entered();
        self.owned_session(identity, session_id)?;
        let outcome = self.engine.set_chain_holder(session_id, chain_id, student)?;
        tracing::info!(chain_id = %chain_id, holder = %outcome.new_holder, seq = outcome.seq, "chain holder overridden");
        Ok(outcome)
    }

    pub fn close_chain(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<CloseOutcome, RelayError> {
        let _span = session_span("close", session_id.as_str()).entered();
        self.owned_session(identity, session_id)?;
        let outcome = self.engine.close_chain(session_id, chain_id)?;
        if !outcome.already_completed {
            self.metrics.chains_closed_total.inc();
        }
        Ok(outcome)
    }

    pub fn get_chain(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<ChainRecord, RelayError> {
        self.visible_session(identity, session_id)?;
        self.engine.get_chain(session_id, chain_id)
    }

    pub fn list_chains(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        phase: Option<Phase>,
    ) -> Result<Vec<ChainRecord>, RelayError> {
        self.visible_session(identity, session_id)?;
        self.engine.list_chains(session_id, phase)
    }

    pub fn chain_history(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Vec<HistoryEntry>, RelayError> {
        self.owned_session(identity, session_id)?;
        self.engine.chain_history(session_id, chain_id)
    }

    /// The chain's live token. Only its holder or the teacher may see it.
    pub fn current_token(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<LiveToken, RelayError> {
        let session = self.sessions.get_session(session_id)?;
        let token = self.engine.current_token(session_id, chain_id)?;
        if identity.role == Role::Student {
            if token.holder_id != identity.id {
                return Err(RelayError::Forbidden(
                    "only the current holder may view the chain token".to_string(),
                ));
            }
        } else {
            require_session_teacher(identity, &session)?;
        }
        Ok(LiveToken {
            session_id: token.session_id.clone(),
            chain_id: chain_id.clone(),
            token_id: token.token_id.clone(),
            holder_id: token.holder_id.clone(),
            seq: token.chain_seq().unwrap_or_default(),
            expires_at: token.expires_at,
            etag: token.etag,
        })
    }

    // ── Scan path ───────────────────────────────────────────────────────

    /// A scanner asks for a code against the holder's token.
    pub fn request_challenge(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        token_id: &TokenId,
        claimed_chain: Option<&ChainId>,
        scan: &ScanContext,
    ) -> Result<ChallengeIssued, RelayError> {
        self.guarded(
            identity,
            session_id,
            ScanOperation::RequestChallenge,
            (Some(token_id), claimed_chain),
            scan,
            || {
                self.verifier
                    .request_challenge(session_id, token_id, claimed_chain, &identity.id)
            },
        )
    }

    /// The holder submits the code read off the scanner's screen.
    pub fn process_chain_scan(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        token_id: &TokenId,
        etag: Option<Etag>,
        code: &str,
        scan: &ScanContext,
    ) -> Result<HopOutcome, RelayError> {
        let outcome = self.guarded(
            identity,
            session_id,
            ScanOperation::ChainScan,
            (Some(token_id), None),
            scan,
            || {
                self.engine.process_chain_scan(&HopRequest {
                    session_id: session_id.clone(),
                    token_id: token_id.clone(),
                    etag,
                    code: code.to_string(),
                    requester: identity.id.clone(),
                })
            },
        )?;
        self.metrics.hops_total.inc();
        Ok(outcome)
    }

    pub fn scan_standalone(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        token_id: &TokenId,
        scan: &ScanContext,
    ) -> Result<StandaloneScan, RelayError> {
        self.guarded(
            identity,
            session_id,
            ScanOperation::StandaloneScan,
            (Some(token_id), None),
            scan,
            || self.sessions.scan_standalone(session_id, token_id, &identity.id),
        )
    }

    /// Role, rate limit and location checks that precede every scan-path
    /// mutation.
    fn preflight(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        scan: &ScanContext,
        now: Timestamp,
        notes: &mut AuditNotes,
    ) -> Result<(), RelayError> {
        require_student(identity)?;
        if let RateDecision::Denied { reason } =
            self.gatekeeper
                .check_rate_limit(scan.fingerprint.as_deref(), scan.ip.as_deref(), now)
        {
            return Err(RelayError::RateLimited(reason));
        }

        let session = self.ctx.load_session(session_id)?;
        let verdict = self.gatekeeper.validate_location(
            session.geofence.as_ref(),
            scan.gps,
            scan.bssid.as_deref(),
        );
        notes.distance_m = verdict.distance_m();
        match verdict {
            LocationVerdict::Block { reason, .. } => Err(RelayError::LocationViolation(reason)),
            LocationVerdict::Warn { reason, .. } => {
                notes.warnings.push(reason);
                Ok(())
            }
            LocationVerdict::Allowed { .. } => Ok(()),
        }
    }

    /// Run `action` behind the preflight checks and write exactly one audit
    /// row for the attempt, whatever its outcome.
    fn guarded<T>(
        &self,
        identity: &Identity,
        session_id: &SessionId,
        operation: ScanOperation,
        (token_id, chain_id): (Option<&TokenId>, Option<&ChainId>),
        scan: &ScanContext,
        action: impl FnOnce() -> Result<T, RelayError>,
    ) -> Result<T, RelayError> {
        let _span = scan_span(operation.as_str(), session_id.as_str(), identity.id.as_str())
            .entered();
        let started = Instant::now();
        let now = self.ctx.now();
        let mut notes = AuditNotes::default();

        let result = self
            .preflight(identity, session_id, scan, now, &mut notes)
            .and_then(|()| action());

        let outcome = match &result {
            Ok(_) => ScanLogEntry::OUTCOME_OK,
            Err(e) => e.code(),
        };
        self.gatekeeper.log_scan(
            &ScanAttempt {
                session_id,
                actor: &identity.id,
                operation,
                token_id,
                chain_id,
                context: scan,
                at: now,
            },
            outcome,
            notes.warnings,
            notes.distance_m,
        );
        self.metrics.record_scan(
            operation.as_str(),
            outcome,
            started.elapsed().as_secs_f64() * 1_000.0,
        );

        if let Err(e) = &result {
            match e {
                RelayError::Store(_) | RelayError::Internal(_) => {
                    tracing::error!(code = outcome, error = %e, "scan failed")
                }
                _ => tracing::debug!(code = outcome, error = %e, "scan rejected"),
            }
        }
        result
    }

    // ── Rotation ────────────────────────────────────────────────────────

    /// One rotation pass over every open session.
    pub fn rotate(&self) -> RotationReport {
        let pass = self.metrics.rotation_passes_total.get() + 1;
        let _span = rotation_span(pass).entered();
        let started = Instant::now();
        let report = self.rotator.rotate();
        self.metrics
            .record_rotation(&report, started.elapsed().as_secs_f64() * 1_000.0);
        if report.failures > 0 {
            tracing::warn!(failures = report.failures, "rotation pass had failures");
        }
        report
    }
}
