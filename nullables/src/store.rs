//! Nullable store: thread-safe in-memory storage.
//!
//! Each entity type gets its own [`MemoryTable`]. Conditional writes take
//! the table's mutex for the whole compare-and-write, which gives the same
//! single-winner guarantee as the LMDB backend.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use baton_store::{
    describe_key, AttendanceRecord, ChainRecord, Entity, EntityStore, Etag, HistoryEntry,
    ScanLogEntry, SessionRecord, StoreError, TokenRecord, Versioned,
};

type Rows<E> = BTreeMap<(String, String), (Etag, E)>;

/// One in-memory table, ordered by `(partition, row)`.
pub struct MemoryTable<E> {
    rows: Mutex<Rows<E>>,
}

impl<E> Default for MemoryTable<E> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<E> MemoryTable<E> {
    fn lock(&self) -> Result<MutexGuard<'_, Rows<E>>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Backend("memory table lock poisoned".to_string()))
    }
}

/// Picks the table that holds `E`.
pub trait TableFor<E> {
    fn table(&self) -> &MemoryTable<E>;
}

/// An in-memory store for every Baton entity.
#[derive(Default)]
pub struct NullStore {
    sessions: MemoryTable<SessionRecord>,
    attendance: MemoryTable<AttendanceRecord>,
    chains: MemoryTable<ChainRecord>,
    tokens: MemoryTable<TokenRecord>,
    history: MemoryTable<HistoryEntry>,
    scan_log: MemoryTable<ScanLogEntry>,
    failing_writes: Mutex<HashSet<&'static str>>,
}

impl NullStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `table` fail with a backend error until
    /// [`heal`](Self::heal) is called.
    pub fn fail_writes(&self, table: &'static str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.insert(table);
        }
    }

    pub fn heal(&self, table: &'static str) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            failing.remove(table);
        }
    }

    fn check_writable(&self, table: &'static str) -> Result<(), StoreError> {
        let failing = self
            .failing_writes
            .lock()
            .map_err(|_| StoreError::Backend("failure set lock poisoned".to_string()))?;
        if failing.contains(table) {
            return Err(StoreError::Backend(format!(
                "injected write failure on table {table}"
            )));
        }
        Ok(())
    }
}

macro_rules! table_for {
    ($entity:ty, $field:ident) => {
        impl TableFor<$entity> for NullStore {
            fn table(&self) -> &MemoryTable<$entity> {
                &self.$field
            }
        }
    };
}

table_for!(SessionRecord, sessions);
table_for!(AttendanceRecord, attendance);
table_for!(ChainRecord, chains);
table_for!(TokenRecord, tokens);
table_for!(HistoryEntry, history);
table_for!(ScanLogEntry, scan_log);

fn key_of<E: Entity>(entity: &E) -> (String, String) {
    (entity.partition_key(), entity.row_key())
}

impl<E: Entity> EntityStore<E> for NullStore
where
    NullStore: TableFor<E>,
{
    fn get(&self, partition: &str, row: &str) -> Result<Versioned<E>, StoreError> {
        let rows = TableFor::<E>::table(self).lock()?;
        rows.get(&(partition.to_string(), row.to_string()))
            .map(|(etag, value)| Versioned::new(value.clone(), *etag))
            .ok_or_else(|| StoreError::NotFound(describe_key(E::TABLE, partition, row)))
    }

    fn create(&self, entity: &E) -> Result<Etag, StoreError> {
        self.check_writable(E::TABLE)?;
        let mut rows = TableFor::<E>::table(self).lock()?;
        let key = key_of(entity);
        if rows.contains_key(&key) {
            return Err(StoreError::Duplicate(describe_key(E::TABLE, &key.0, &key.1)));
        }
        rows.insert(key, (Etag::INITIAL, entity.clone()));
        Ok(Etag::INITIAL)
    }

    fn replace(&self, entity: &E, expected: Etag) -> Result<Etag, StoreError> {
        self.check_writable(E::TABLE)?;
        let mut rows = TableFor::<E>::table(self).lock()?;
        let key = key_of(entity);
        let Some((found, value)) = rows.get_mut(&key) else {
            return Err(StoreError::NotFound(describe_key(E::TABLE, &key.0, &key.1)));
        };
        if *found != expected {
            return Err(StoreError::VersionConflict {
                key: describe_key(E::TABLE, &key.0, &key.1),
                expected: expected.as_u64(),
                found: found.as_u64(),
            });
        }
        *found = expected.next();
        *value = entity.clone();
        Ok(*found)
    }

    fn upsert(&self, entity: &E) -> Result<Etag, StoreError> {
        self.check_writable(E::TABLE)?;
        let mut rows = TableFor::<E>::table(self).lock()?;
        let key = key_of(entity);
        let next = rows
            .get(&key)
            .map(|(etag, _)| etag.next())
            .unwrap_or(Etag::INITIAL);
        rows.insert(key, (next, entity.clone()));
        Ok(next)
    }

    fn delete(&self, partition: &str, row: &str, expected: Option<Etag>) -> Result<bool, StoreError> {
        self.check_writable(E::TABLE)?;
        let mut rows = TableFor::<E>::table(self).lock()?;
        let key = (partition.to_string(), row.to_string());
        let Some((found, _)) = rows.get(&key) else {
            return Ok(false);
        };
        if let Some(expected) = expected {
            if *found != expected {
                return Err(StoreError::VersionConflict {
                    key: describe_key(E::TABLE, partition, row),
                    expected: expected.as_u64(),
                    found: found.as_u64(),
                });
            }
        }
        rows.remove(&key);
        Ok(true)
    }

    fn list_by_filter(
        &self,
        partition: Option<&str>,
        filter: &dyn Fn(&E) -> bool,
    ) -> Result<Vec<Versioned<E>>, StoreError> {
        let rows = TableFor::<E>::table(self).lock()?;
        Ok(rows
            .iter()
            .filter(|((p, _), _)| partition.map_or(true, |want| p == want))
            .filter(|(_, (_, value))| filter(value))
            .map(|(_, (etag, value))| Versioned::new(value.clone(), *etag))
            .collect())
    }
}
