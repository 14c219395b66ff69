//! Scan audit trail.
//!
//! Every attempt, successful or not, produces one [`ScanLogEntry`]. Writing
//! it is fire-and-forget: a failed write is logged and swallowed so the
//! caller's response is never affected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use baton_store::{AttendanceStore, ScanLogEntry, ScanLogStore, ScanOperation};
use baton_types::{ChainId, GeoPoint, RandomSource, SessionId, Timestamp, TokenId, UserId};

/// Client-supplied metadata accompanying a scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanContext {
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
    pub gps: Option<GeoPoint>,
    pub bssid: Option<String>,
}

/// One attempt to be audited.
#[derive(Clone, Debug)]
pub struct ScanAttempt<'a> {
    pub session_id: &'a SessionId,
    pub actor: &'a UserId,
    pub operation: ScanOperation,
    pub token_id: Option<&'a TokenId>,
    pub chain_id: Option<&'a ChainId>,
    pub context: &'a ScanContext,
    pub at: Timestamp,
}

pub struct ScanAuditor {
    store: Arc<dyn AttendanceStore>,
    random: Arc<dyn RandomSource>,
    fallback_nonce: AtomicU64,
}

impl ScanAuditor {
    pub fn new(store: Arc<dyn AttendanceStore>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            store,
            random,
            fallback_nonce: AtomicU64::new(0),
        }
    }

    fn nonce(&self) -> String {
        match self.random.identifier("") {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(error = %e, "random nonce unavailable, using counter");
                format!("n{}", self.fallback_nonce.fetch_add(1, Ordering::Relaxed))
            }
        }
    }

    /// Write one audit row for `attempt`. Never fails.
    pub fn log_scan(
        &self,
        attempt: &ScanAttempt<'_>,
        outcome: &str,
        warnings: Vec<String>,
        distance_m: Option<f64>,
    ) {
        let entry = ScanLogEntry {
            session_id: attempt.session_id.clone(),
            log_id: ScanLogEntry::log_id_for(attempt.at, &self.nonce()),
            at: attempt.at,
            actor: attempt.actor.clone(),
            operation: attempt.operation,
            token_id: attempt.token_id.cloned(),
            chain_id: attempt.chain_id.cloned(),
            fingerprint: attempt.context.fingerprint.clone(),
            ip: attempt.context.ip.clone(),
            gps: attempt.context.gps,
            bssid: attempt.context.bssid.clone(),
            outcome: outcome.to_string(),
            warnings,
            distance_m,
        };

        if let Err(e) = self.store.append_scan_log(&entry) {
            tracing::warn!(
                session_id = %entry.session_id,
                actor = %entry.actor,
                outcome = %entry.outcome,
                error = %e,
                "failed to write scan audit row"
            );
        }
    }
}
