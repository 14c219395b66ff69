//! Relay chain records.

use baton_types::{ChainId, ChainState, Phase, SessionId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityStore, Etag, Versioned};
use crate::StoreError;

/// One relay of token possession across students.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub session_id: SessionId,
    pub chain_id: ChainId,
    pub phase: Phase,
    /// Which seeding round created this chain (0 for the first seed).
    pub seed_index: u32,
    pub state: ChainState,
    pub last_holder: UserId,
    /// Sequence number of the latest hop. Seed is 0.
    pub last_seq: u64,
    pub last_at: Timestamp,
    pub created_at: Timestamp,
}

impl ChainRecord {
    /// The chain after a hop to `holder` at `now`.
    pub fn advanced(&self, holder: UserId, now: Timestamp) -> Self {
        Self {
            last_holder: holder,
            last_seq: self.last_seq + 1,
            last_at: now,
            state: ChainState::Active,
            ..self.clone()
        }
    }
}

impl Entity for ChainRecord {
    const TABLE: &'static str = "chains";

    fn partition_key(&self) -> String {
        self.session_id.to_string()
    }

    fn row_key(&self) -> String {
        self.chain_id.to_string()
    }
}

/// Typed access to chain rows.
pub trait ChainStore: EntityStore<ChainRecord> {
    fn create_chain(&self, chain: &ChainRecord) -> Result<Versioned<ChainRecord>, StoreError> {
        let etag = EntityStore::<ChainRecord>::create(self, chain)?;
        Ok(Versioned::new(chain.clone(), etag))
    }

    fn get_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Versioned<ChainRecord>, StoreError> {
        EntityStore::<ChainRecord>::get(self, session_id.as_str(), chain_id.as_str())
    }

    fn find_chain(
        &self,
        session_id: &SessionId,
        chain_id: &ChainId,
    ) -> Result<Option<Versioned<ChainRecord>>, StoreError> {
        EntityStore::<ChainRecord>::find(self, session_id.as_str(), chain_id.as_str())
    }

    fn replace_chain(
        &self,
        chain: &ChainRecord,
        expected: Etag,
    ) -> Result<Versioned<ChainRecord>, StoreError> {
        let etag = EntityStore::<ChainRecord>::replace(self, chain, expected)?;
        Ok(Versioned::new(chain.clone(), etag))
    }

    fn delete_chain(&self, session_id: &SessionId, chain_id: &ChainId) -> Result<bool, StoreError> {
        EntityStore::<ChainRecord>::delete(self, session_id.as_str(), chain_id.as_str(), None)
    }

    fn list_chains(
        &self,
        session_id: Option<&SessionId>,
        filter: &dyn Fn(&ChainRecord) -> bool,
    ) -> Result<Vec<Versioned<ChainRecord>>, StoreError> {
        EntityStore::<ChainRecord>::list_by_filter(self, session_id.map(|s| s.as_str()), filter)
    }
}

impl<S: EntityStore<ChainRecord> + ?Sized> ChainStore for S {}
