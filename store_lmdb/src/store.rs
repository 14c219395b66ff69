//! Generic [`EntityStore`] over a single LMDB database.
//!
//! Values are `bincode((etag, entity))`. Conditional writes read the stored
//! etag and write the new row inside one write transaction; LMDB allows a
//! single writer at a time, so the comparison and the write are atomic.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, RoTxn};

use baton_store::{describe_key, Entity, EntityStore, Etag, StoreError, Versioned};

use crate::environment::LmdbEnvironment;
use crate::keys::{entity_key, increment_prefix, scan_prefix};
use crate::LmdbError;

#[derive(Clone)]
pub struct LmdbStore {
    env: Arc<Env>,
    entities: Database<Bytes, Bytes>,
}

impl LmdbStore {
    pub fn new(environment: &LmdbEnvironment) -> Self {
        Self {
            env: Arc::clone(&environment.env),
            entities: environment.entities,
        }
    }

    /// Open (or create) an environment at `path` and wrap it.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        let environment = LmdbEnvironment::open(path, map_size)?;
        Ok(Self::new(&environment))
    }

    /// Stored etag of `key`, if the row exists.
    fn stored_etag(&self, txn: &RoTxn<'_>, key: &[u8]) -> Result<Option<u64>, LmdbError> {
        match self.entities.get(txn, key)? {
            Some(bytes) => {
                // The etag is the leading fixed-width u64 of the tuple encoding.
                let etag: u64 = bincode::deserialize(bytes)?;
                Ok(Some(etag))
            }
            None => Ok(None),
        }
    }
}

fn encode<E: Entity>(etag: Etag, entity: &E) -> Result<Vec<u8>, LmdbError> {
    Ok(bincode::serialize(&(etag.as_u64(), entity))?)
}

fn decode<E: Entity>(bytes: &[u8]) -> Result<Versioned<E>, LmdbError> {
    let (etag, value): (u64, E) = bincode::deserialize(bytes)?;
    Ok(Versioned::new(value, Etag::new(etag)))
}

impl<E: Entity> EntityStore<E> for LmdbStore {
    fn get(&self, partition: &str, row: &str) -> Result<Versioned<E>, StoreError> {
        let key = entity_key(E::TABLE, partition, row);
        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bytes = self
            .entities
            .get(&rtxn, &key)
            .map_err(LmdbError::from)?
            .ok_or_else(|| LmdbError::NotFound(describe_key(E::TABLE, partition, row)))?;
        Ok(decode(bytes)?)
    }

    fn create(&self, entity: &E) -> Result<Etag, StoreError> {
        let (partition, row) = (entity.partition_key(), entity.row_key());
        let key = entity_key(E::TABLE, &partition, &row);
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        if self.stored_etag(&wtxn, &key)?.is_some() {
            return Err(LmdbError::Duplicate(describe_key(E::TABLE, &partition, &row)).into());
        }
        let bytes = encode(Etag::INITIAL, entity)?;
        self.entities
            .put(&mut wtxn, &key, &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(Etag::INITIAL)
    }

    fn replace(&self, entity: &E, expected: Etag) -> Result<Etag, StoreError> {
        let (partition, row) = (entity.partition_key(), entity.row_key());
        let key = entity_key(E::TABLE, &partition, &row);
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let found = self
            .stored_etag(&wtxn, &key)?
            .ok_or_else(|| LmdbError::NotFound(describe_key(E::TABLE, &partition, &row)))?;
        if found != expected.as_u64() {
            return Err(LmdbError::Conflict {
                key: describe_key(E::TABLE, &partition, &row),
                expected: expected.as_u64(),
                found,
            }
            .into());
        }
        let next = expected.next();
        let bytes = encode(next, entity)?;
        self.entities
            .put(&mut wtxn, &key, &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(next)
    }

    fn upsert(&self, entity: &E) -> Result<Etag, StoreError> {
        let key = entity_key(E::TABLE, &entity.partition_key(), &entity.row_key());
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let next = match self.stored_etag(&wtxn, &key)? {
            Some(found) => Etag::new(found).next(),
            None => Etag::INITIAL,
        };
        let bytes = encode(next, entity)?;
        self.entities
            .put(&mut wtxn, &key, &bytes)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(next)
    }

    fn delete(&self, partition: &str, row: &str, expected: Option<Etag>) -> Result<bool, StoreError> {
        let key = entity_key(E::TABLE, partition, row);
        let mut wtxn = self.env.write_txn().map_err(LmdbError::from)?;
        let Some(found) = self.stored_etag(&wtxn, &key)? else {
            return Ok(false);
        };
        if let Some(expected) = expected {
            if found != expected.as_u64() {
                return Err(LmdbError::Conflict {
                    key: describe_key(E::TABLE, partition, row),
                    expected: expected.as_u64(),
                    found,
                }
                .into());
            }
        }
        let deleted = self
            .entities
            .delete(&mut wtxn, &key)
            .map_err(LmdbError::from)?;
        wtxn.commit().map_err(LmdbError::from)?;
        Ok(deleted)
    }

    fn list_by_filter(
        &self,
        partition: Option<&str>,
        filter: &dyn Fn(&E) -> bool,
    ) -> Result<Vec<Versioned<E>>, StoreError> {
        let prefix = scan_prefix(E::TABLE, partition);
        let mut upper = prefix.clone();
        let upper_bound = if increment_prefix(&mut upper) {
            Bound::Excluded(upper.as_slice())
        } else {
            Bound::Unbounded
        };

        let rtxn = self.env.read_txn().map_err(LmdbError::from)?;
        let bounds = (Bound::Included(prefix.as_slice()), upper_bound);
        let iter = self
            .entities
            .range(&rtxn, &bounds)
            .map_err(LmdbError::from)?;
        let mut results = Vec::new();
        for result in iter {
            let (_key, val) = result.map_err(LmdbError::from)?;
            let item: Versioned<E> = decode(val)?;
            if filter(&item.value) {
                results.push(item);
            }
        }
        Ok(results)
    }
}
