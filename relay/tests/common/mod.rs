#![allow(dead_code)]

use std::sync::Arc;

use baton_nullables::{NullClock, NullNotifier, NullRandom, NullStore};
use baton_relay::{
    ChainEngine, ChallengeVerifier, HopOutcome, HopRequest, NewSession, RelayConfig, RelayContext,
    RelayError, SessionManager,
};
use baton_store::{AttendanceRecordStore, ChainRecord};
use baton_types::{
    session_topic, EntryStatus, Phase, SessionEvent, SessionId, Timestamp, TokenId, UserId,
};

pub const SECRET: &[u8] = b"relay-test-secret";
pub const START_SECS: u64 = 10_000;

pub struct Harness {
    pub store: Arc<NullStore>,
    pub clock: Arc<NullClock>,
    pub notifier: Arc<NullNotifier>,
    pub verifier: Arc<ChallengeVerifier>,
    pub engine: Arc<ChainEngine>,
    pub sessions: SessionManager,
    pub session_id: SessionId,
}

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// A harness with one active session owned by `prof`, starting now,
    /// lasting an hour, late after 10 minutes.
    pub fn with_config(config: RelayConfig) -> Self {
        let store = Arc::new(NullStore::new());
        let clock = Arc::new(NullClock::at_secs(START_SECS));
        let notifier = Arc::new(NullNotifier::new());
        let ctx = RelayContext::new(
            store.clone(),
            clock.clone(),
            Arc::new(NullRandom::default()),
            notifier.clone(),
            config,
        );
        let verifier = Arc::new(ChallengeVerifier::new(ctx.clone(), SECRET));
        let engine = Arc::new(ChainEngine::new(ctx.clone(), verifier.clone()));
        let sessions = SessionManager::new(ctx, engine.clone());
        let session = sessions
            .create_session(NewSession {
                id: Some(SessionId::new("s1")),
                teacher_id: user("prof"),
                starts_at: Timestamp::from_secs(START_SECS),
                ends_at: Timestamp::from_secs(START_SECS + 3_600),
                late_cutoff_minutes: 10,
                exit_window_minutes: 10,
                geofence: None,
            })
            .unwrap();
        Self {
            store,
            clock,
            notifier,
            verifier,
            engine,
            sessions,
            session_id: session.id,
        }
    }

    /// Enroll each student and mark them online.
    pub fn enroll_online(&self, students: &[&str]) {
        for s in students {
            self.sessions.enroll_student(&self.session_id, &user(s)).unwrap();
            self.sessions.heartbeat(&self.session_id, &user(s), true).unwrap();
        }
    }

    /// Give `student` an entry milestone directly, as if an entry chain had
    /// already passed through them.
    pub fn mark_entered(&self, student: &str) {
        let current = self.store.get_attendance(&self.session_id, &user(student)).unwrap();
        let mut next = current.value.clone();
        next.entry_status = Some(EntryStatus::PresentEntry);
        next.entry_at = Some(self.clock_now());
        current.compare_and_swap(self.store.as_ref(), next).unwrap();
    }

    pub fn clock_now(&self) -> Timestamp {
        use baton_types::Clock;
        self.clock.now()
    }

    pub fn seed_one(&self, phase: Phase) -> ChainRecord {
        let mut chains = self.engine.seed_chains(&self.session_id, phase, 1).unwrap();
        assert_eq!(chains.len(), 1);
        chains.remove(0)
    }

    pub fn live_token(&self, chain: &ChainRecord) -> TokenId {
        self.engine
            .current_token(&self.session_id, &chain.chain_id)
            .unwrap()
            .token_id
            .clone()
    }

    /// `scanner` reads `holder`'s QR, requests a code, and the holder enters it.
    pub fn hop(
        &self,
        token_id: &TokenId,
        holder: &UserId,
        scanner: &UserId,
    ) -> Result<HopOutcome, RelayError> {
        let issued = self
            .verifier
            .request_challenge(&self.session_id, token_id, None, scanner)?;
        self.engine.process_chain_scan(&HopRequest {
            session_id: self.session_id.clone(),
            token_id: token_id.clone(),
            etag: Some(issued.token_etag),
            code: issued.code,
            requester: holder.clone(),
        })
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.notifier.events_on(&session_topic(&self.session_id))
    }
}
