//! Append-only audit rows, one per scan attempt.

use baton_types::{ChainId, GeoPoint, SessionId, Timestamp, TokenId, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Versioned};
use crate::StoreError;

/// The operation a logged attempt was making.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOperation {
    RequestChallenge,
    ChainScan,
    StandaloneScan,
}

impl ScanOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestChallenge => "request_challenge",
            Self::ChainScan => "chain_scan",
            Self::StandaloneScan => "standalone_scan",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub session_id: SessionId,
    /// Unique per row; prefixed with the zero-padded timestamp so rows list
    /// in time order.
    pub log_id: String,
    pub at: Timestamp,
    pub actor: UserId,
    pub operation: ScanOperation,
    pub token_id: Option<TokenId>,
    pub chain_id: Option<ChainId>,
    pub fingerprint: Option<String>,
    pub ip: Option<String>,
    pub gps: Option<GeoPoint>,
    pub bssid: Option<String>,
    /// `OK` or the error code the attempt failed with.
    pub outcome: String,
    pub warnings: Vec<String>,
    pub distance_m: Option<f64>,
}

impl ScanLogEntry {
    pub const OUTCOME_OK: &'static str = "OK";

    pub fn log_id_for(at: Timestamp, nonce: &str) -> String {
        format!("{:020}-{nonce}", at.as_millis())
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Self::OUTCOME_OK
    }
}

impl Entity for ScanLogEntry {
    const TABLE: &'static str = "scan_log";

    fn partition_key(&self) -> String {
        self.session_id.to_string()
    }

    fn row_key(&self) -> String {
        self.log_id.clone()
    }
}

pub trait ScanLogStore: EntityStore<ScanLogEntry> {
    fn append_scan_log(&self, entry: &ScanLogEntry) -> Result<(), StoreError> {
        EntityStore::<ScanLogEntry>::create(self, entry).map(|_| ())
    }

    fn scan_log(&self, session_id: &SessionId) -> Result<Vec<ScanLogEntry>, StoreError> {
        let rows =
            EntityStore::<ScanLogEntry>::list_by_filter(self, Some(session_id.as_str()), &|_| true)?;
        Ok(rows.into_iter().map(Versioned::into_inner).collect())
    }

    fn delete_scan_log(&self, entry: &ScanLogEntry) -> Result<bool, StoreError> {
        EntityStore::<ScanLogEntry>::delete(self, &entry.partition_key(), &entry.row_key(), None)
    }
}

impl<S: EntityStore<ScanLogEntry> + ?Sized> ScanLogStore for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ids_sort_by_time() {
        let a = ScanLogEntry::log_id_for(Timestamp::from_millis(9), "zz");
        let b = ScanLogEntry::log_id_for(Timestamp::from_millis(10), "aa");
        assert!(a < b);
    }
}
