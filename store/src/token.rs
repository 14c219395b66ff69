//! Token records: chain tokens and the standalone late-entry / early-leave
//! tokens a teacher projects.

use baton_types::{ChainId, SessionId, StandaloneKind, Timestamp, TokenId, TokenStatus, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Etag, Versioned};
use crate::StoreError;

/// What a token grants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    /// The live token of a chain at hop `seq`.
    Chain { chain_id: ChainId, seq: u64 },
    LateEntry,
    EarlyLeave,
}

impl TokenKind {
    pub fn standalone(kind: StandaloneKind) -> Self {
        match kind {
            StandaloneKind::LateEntry => Self::LateEntry,
            StandaloneKind::EarlyLeave => Self::EarlyLeave,
        }
    }

    pub fn chain_id(&self) -> Option<&ChainId> {
        match self {
            Self::Chain { chain_id, .. } => Some(chain_id),
            _ => None,
        }
    }

    pub fn as_standalone(&self) -> Option<StandaloneKind> {
        match self {
            Self::Chain { .. } => None,
            Self::LateEntry => Some(StandaloneKind::LateEntry),
            Self::EarlyLeave => Some(StandaloneKind::EarlyLeave),
        }
    }
}

/// An outstanding challenge issued to one scanner.
///
/// Only a keyed hash of the code is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChallenge {
    pub scanner_id: UserId,
    pub code_hash: String,
    pub expires_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub session_id: SessionId,
    pub token_id: TokenId,
    pub kind: TokenKind,
    pub holder_id: UserId,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: TokenStatus,
    pub single_use: bool,
    pub pending_challenge: Option<PendingChallenge>,
}

impl TokenRecord {
    /// A fresh single-use chain token.
    pub fn chain(
        session_id: SessionId,
        token_id: TokenId,
        chain_id: ChainId,
        seq: u64,
        holder_id: UserId,
        issued_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            session_id,
            token_id,
            kind: TokenKind::Chain { chain_id, seq },
            holder_id,
            issued_at,
            expires_at,
            status: TokenStatus::Active,
            single_use: true,
            pending_challenge: None,
        }
    }

    /// A fresh reusable standalone token.
    pub fn standalone(
        session_id: SessionId,
        token_id: TokenId,
        kind: StandaloneKind,
        holder_id: UserId,
        issued_at: Timestamp,
        expires_at: Timestamp,
    ) -> Self {
        Self {
            session_id,
            token_id,
            kind: TokenKind::standalone(kind),
            holder_id,
            issued_at,
            expires_at,
            status: TokenStatus::Active,
            single_use: false,
            pending_challenge: None,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.has_passed(now)
    }

    /// Active and not yet past expiry.
    pub fn is_live(&self, now: Timestamp) -> bool {
        self.status == TokenStatus::Active && !self.is_expired(now)
    }

    pub fn chain_seq(&self) -> Option<u64> {
        match self.kind {
            TokenKind::Chain { seq, .. } => Some(seq),
            _ => None,
        }
    }

    pub fn belongs_to_chain(&self, chain_id: &ChainId) -> bool {
        self.kind.chain_id() == Some(chain_id)
    }

    /// This token with `status` set and any pending challenge cleared.
    pub fn with_status(&self, status: TokenStatus) -> Self {
        Self {
            status,
            pending_challenge: None,
            ..self.clone()
        }
    }
}

impl Entity for TokenRecord {
    const TABLE: &'static str = "tokens";

    fn partition_key(&self) -> String {
        self.session_id.to_string()
    }

    fn row_key(&self) -> String {
        self.token_id.to_string()
    }
}

/// Typed access to token rows.
pub trait TokenStore: EntityStore<TokenRecord> {
    fn create_token(&self, token: &TokenRecord) -> Result<Versioned<TokenRecord>, StoreError> {
        let etag = EntityStore::<TokenRecord>::create(self, token)?;
        Ok(Versioned::new(token.clone(), etag))
    }

    fn get_token(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
    ) -> Result<Versioned<TokenRecord>, StoreError> {
        EntityStore::<TokenRecord>::get(self, session_id.as_str(), token_id.as_str())
    }

    fn find_token(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
    ) -> Result<Option<Versioned<TokenRecord>>, StoreError> {
        EntityStore::<TokenRecord>::find(self, session_id.as_str(), token_id.as_str())
    }

    /// Overwrite `token` only if the stored row is still at `expected`.
    fn conditional_replace_token(
        &self,
        token: &TokenRecord,
        expected: Etag,
    ) -> Result<Versioned<TokenRecord>, StoreError> {
        let etag = EntityStore::<TokenRecord>::replace(self, token, expected)?;
        Ok(Versioned::new(token.clone(), etag))
    }

    fn delete_token(&self, session_id: &SessionId, token_id: &TokenId) -> Result<bool, StoreError> {
        EntityStore::<TokenRecord>::delete(self, session_id.as_str(), token_id.as_str(), None)
    }

    fn list_tokens(
        &self,
        session_id: Option<&SessionId>,
        filter: &dyn Fn(&TokenRecord) -> bool,
    ) -> Result<Vec<Versioned<TokenRecord>>, StoreError> {
        EntityStore::<TokenRecord>::list_by_filter(self, session_id.map(|s| s.as_str()), filter)
    }

    /// Every token, of any status, issued for `chain_id`.
    fn tokens_for_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Vec<Versioned<TokenRecord>>, StoreError> {
        EntityStore::<TokenRecord>::list_by_filter(self, Some(session_id.as_str()), &|t| {
            t.belongs_to_chain(chain_id)
        })
    }
}

impl<S: EntityStore<TokenRecord> + ?Sized> TokenStore for S {}
