//! Mutual-proximity challenge codes.
//!
//! A scanner who has read the holder's QR asks for a code; the holder must
//! type that code on their own device to complete the hop. Codes are
//! derived with a keyed hash of `(token, scanner, issue time)` and only a
//! keyed hash of the code is stored on the token.

use std::sync::Arc;

use baton_crypto::{challenge_code_hash, derive_challenge_code, verify_challenge_code};
use baton_store::{AttendanceRecordStore, Etag, PendingChallenge, TokenRecord};
use baton_types::{ChainId, SessionId, Timestamp, TokenId, UserId};
use serde::Serialize;

use crate::context::token_write_error;
use crate::{RelayContext, RelayError};

/// Returned to the scanner by [`ChallengeVerifier::request_challenge`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChallengeIssued {
    pub code: String,
    pub holder_id: UserId,
    /// Token version after the challenge was stored; pass it back on the hop.
    pub token_etag: Etag,
    pub expires_at: Timestamp,
}

pub struct ChallengeVerifier {
    ctx: RelayContext,
    secret: Arc<[u8]>,
}

impl ChallengeVerifier {
    pub fn new(ctx: RelayContext, secret: impl Into<Arc<[u8]>>) -> Self {
        Self {
            ctx,
            secret: secret.into(),
        }
    }

    /// Issue a challenge for `scanner` against the chain token `token_id`.
    ///
    /// A new request replaces any earlier pending challenge on the token.
    pub fn request_challenge(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
        claimed_chain: Option<&ChainId>,
        scanner: &UserId,
    ) -> Result<ChallengeIssued, RelayError> {
        let now = self.ctx.now();
        let (token, _chain) = self.ctx.load_hop_target(session_id, token_id, now)?;
        if let Some(claimed) = claimed_chain {
            if !token.belongs_to_chain(claimed) {
                return Err(RelayError::InvalidToken(format!(
                    "token does not belong to chain {claimed}"
                )));
            }
        }
        self.ctx.load_active_session(session_id)?;
        if *scanner == token.holder_id {
            return Err(RelayError::SelfScan);
        }
        if self.ctx.store.find_attendance(session_id, scanner)?.is_none() {
            return Err(RelayError::NotEnrolled(scanner.to_string()));
        }

        let code = derive_challenge_code(
            &self.secret,
            token_id.as_str(),
            scanner.as_str(),
            now.as_millis(),
        );
        let expires_at = now.plus(self.ctx.config.challenge_ttl());
        let mut next = token.value.clone();
        next.pending_challenge = Some(PendingChallenge {
            scanner_id: scanner.clone(),
            code_hash: challenge_code_hash(&self.secret, token_id.as_str(), scanner.as_str(), &code),
            expires_at,
        });
        let written = token
            .compare_and_swap(self.ctx.store.as_ref(), next)
            .map_err(|e| token_write_error(e, token_id))?;

        tracing::debug!(
            session_id = %session_id,
            token_id = %token_id,
            scanner = %scanner,
            "challenge issued"
        );

        Ok(ChallengeIssued {
            code,
            holder_id: written.holder_id.clone(),
            token_etag: written.etag,
            expires_at,
        })
    }

    /// Check `entered_code` on the stored token. Returns the pending scanner,
    /// who becomes the next holder.
    pub fn validate_challenge(
        &self,
        session_id: &SessionId,
        token_id: &TokenId,
        entered_code: &str,
        requester: &UserId,
    ) -> Result<UserId, RelayError> {
        let now = self.ctx.now();
        let (token, _chain) = self.ctx.load_hop_target(session_id, token_id, now)?;
        self.check(&token, entered_code, requester, now)
    }

    pub(crate) fn check(
        &self,
        token: &TokenRecord,
        entered_code: &str,
        requester: &UserId,
        now: Timestamp,
    ) -> Result<UserId, RelayError> {
        let pending = token
            .pending_challenge
            .as_ref()
            .ok_or(RelayError::NoPendingChallenge)?;
        if pending.expires_at.has_passed(now) {
            return Err(RelayError::ChallengeExpired);
        }
        let matches = verify_challenge_code(
            &self.secret,
            token.token_id.as_str(),
            pending.scanner_id.as_str(),
            entered_code,
            &pending.code_hash,
        );
        if !matches {
            return Err(RelayError::InvalidChallenge);
        }
        if *requester != token.holder_id {
            return Err(RelayError::NotHolder);
        }
        Ok(pending.scanner_id.clone())
    }
}
