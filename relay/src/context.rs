//! Collaborators shared by the relay engines.

use std::sync::Arc;

use baton_store::{
    AttendanceStore, StoreError, ChainRecord, ChainStore, SessionRecord, SessionStore, TokenRecord,
    TokenStore, Versioned,
};
use baton_types::{
    session_topic, ChainId, Clock, Notifier, Phase, RandomSource, SessionEvent, SessionId,
    Timestamp, TokenId, TokenStatus,
};

use crate::{RelayConfig, RelayError};

/// Store, clock, randomness and notification handles plus tunables.
#[derive(Clone)]
pub struct RelayContext {
    pub store: Arc<dyn AttendanceStore>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub notifier: Arc<dyn Notifier>,
    pub config: RelayConfig,
}

impl RelayContext {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        notifier: Arc<dyn Notifier>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            clock,
            random,
            notifier,
            config,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Publish on the session topic. Failures are logged, never returned.
    pub fn publish(&self, event: SessionEvent) {
        let topic = session_topic(event.session_id());
        if let Err(e) = self.notifier.publish(&topic, &event) {
            tracing::warn!(topic = %topic, error = %e, "failed to publish session event");
        }
    }

    pub fn new_token_id(&self) -> Result<TokenId, RelayError> {
        Ok(TokenId::parse(self.random.identifier("tk-")?)?)
    }

    pub fn new_chain_id(&self, phase: Phase, seed_index: u32) -> Result<ChainId, RelayError> {
        let prefix = format!("{}-{seed_index}-", phase.as_str().to_ascii_lowercase());
        Ok(ChainId::parse(self.random.identifier(&prefix)?)?)
    }

    pub fn load_session(&self, id: &SessionId) -> Result<Versioned<SessionRecord>, RelayError> {
        self.store
            .find_session(id)?
            .ok_or_else(|| RelayError::SessionNotFound(id.to_string()))
    }

    /// Load a session that still accepts mutations.
    pub fn load_active_session(
        &self,
        id: &SessionId,
    ) -> Result<Versioned<SessionRecord>, RelayError> {
        let session = self.load_session(id)?;
        if session.is_ended() {
            return Err(RelayError::SessionEnded);
        }
        Ok(session)
    }

    pub fn load_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Versioned<ChainRecord>, RelayError> {
        self.store
            .find_chain(session_id, chain_id)?
            .ok_or_else(|| RelayError::ChainNotFound(chain_id.to_string()))
    }

    /// Load a chain token that can currently be hopped, with its chain.
    ///
    /// Fails `TOKEN_NOT_FOUND`, `TOKEN_USED` (consumed or behind the chain),
    /// `TOKEN_EXPIRED`, `CHAIN_NOT_FOUND` or `INVALID_TOKEN` (not a chain
    /// token, or the chain is completed).
    pub fn load_hop_target(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
        now: Timestamp,
    ) -> Result<(Versioned<TokenRecord>, Versioned<ChainRecord>), RelayError> {
        let token = self
            .store
            .find_token(session_id, token_id)?
            .ok_or_else(|| RelayError::TokenNotFound(token_id.to_string()))?;

        match token.status {
            TokenStatus::Consumed => return Err(RelayError::TokenUsed),
            TokenStatus::Expired => return Err(RelayError::TokenExpired),
            TokenStatus::Active => {}
        }
        if token.is_expired(now) {
            return Err(RelayError::TokenExpired);
        }

        let Some(chain_id) = token.kind.chain_id() else {
            return Err(RelayError::InvalidToken("not a chain token".to_string()));
        };
        let chain = self.load_chain(session_id, chain_id)?;
        if !chain.state.accepts_hops() {
            return Err(RelayError::InvalidToken("chain is completed".to_string()));
        }
        // A later hop means this token was spent, possibly by a racing scan
        // that landed between the two reads above.
        if token.chain_seq() != Some(chain.last_seq) {
            return Err(RelayError::TokenUsed);
        }
        if token.holder_id != chain.last_holder {
            return Err(RelayError::InvalidToken(
                "token holder does not match the chain".to_string(),
            ));
        }
        Ok((token, chain))
    }
}

/// Map a failed conditional write on a token: a vanished row means the
/// token was closed out from under the caller.
pub(crate) fn token_write_error(e: StoreError, token_id: &TokenId) -> RelayError {
    if e.is_not_found() {
        RelayError::TokenNotFound(token_id.to_string())
    } else {
        e.into()
    }
}
