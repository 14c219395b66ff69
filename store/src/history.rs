//! Append-only chain hop history.
//!
//! Row keys are `<chain_id>.<sequence>` with the sequence zero-padded, so a
//! partition scan returns each chain's hops in order.

use baton_types::{ChainId, Phase, SessionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Versioned};
use crate::StoreError;

/// How a hop came about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HopKind {
    /// Sequence 0, issued by seeding.
    Seed,
    /// Peer scan with a verified challenge.
    Scan,
    /// Teacher override.
    Override,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: SessionId,
    pub chain_id: ChainId,
    pub sequence: u64,
    /// Previous holder, or the synthetic `TEACHER` origin for sequence 0.
    pub from_holder: String,
    pub to_holder: UserId,
    pub scanned_at: Timestamp,
    pub phase: Phase,
    pub kind: HopKind,
}

fn history_row(chain_id: &ChainId, sequence: u64) -> String {
    format!("{chain_id}.{sequence:020}")
}

impl Entity for HistoryEntry {
    const TABLE: &'static str = "history";

    fn partition_key(&self) -> String {
        self.session_id.to_string()
    }

    fn row_key(&self) -> String {
        history_row(&self.chain_id, self.sequence)
    }
}

/// Append-only access to hop history.
pub trait HistoryStore: EntityStore<HistoryEntry> {
    /// Append a hop. `Duplicate` if that sequence was already recorded.
    fn append_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        EntityStore::<HistoryEntry>::create(self, entry).map(|_| ())
    }

    fn chain_history(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = EntityStore::<HistoryEntry>::list_by_filter(
            self,
            Some(session_id.as_str()),
            &|e: &HistoryEntry| e.chain_id == *chain_id,
        )?;
        let mut entries: Vec<HistoryEntry> = rows.into_iter().map(Versioned::into_inner).collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    fn delete_history(&self, entry: &HistoryEntry) -> Result<bool, StoreError> {
        EntityStore::<HistoryEntry>::delete(self, &entry.partition_key(), &entry.row_key(), None)
    }

    fn session_history(&self, session_id: &SessionId) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows =
            EntityStore::<HistoryEntry>::list_by_filter(self, Some(session_id.as_str()), &|_| true)?;
        Ok(rows.into_iter().map(Versioned::into_inner).collect())
    }
}

impl<S: EntityStore<HistoryEntry> + ?Sized> HistoryStore for S {}
