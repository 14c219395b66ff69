//! Generic keyed entity storage with optimistic concurrency.
//!
//! Every record lives under `(table, partition_key, row_key)` and carries an
//! [`Etag`] that changes on every write. Conditional writes compare the
//! caller's etag with the stored one inside the backend's own atomic
//! section, so two writers racing on the same row can never both succeed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::StoreError;

/// A record type that can be persisted.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical table name, unique per entity type.
    const TABLE: &'static str;

    fn partition_key(&self) -> String;

    fn row_key(&self) -> String;
}

/// Opaque row version. Starts at 1 on create and increases by one per write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Etag(u64);

impl Etag {
    pub const INITIAL: Self = Self(1);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The version a successful write produces.
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Etag {
    type Err = StoreError;

    /// Accepts `7`, `"7"` and `W/"7"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("W/").trim_matches('"');
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| StoreError::Serialization(format!("malformed etag: {s:?}")))
    }
}

/// A value read from the store together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: Etag,
}

impl<T> Versioned<T> {
    pub fn new(value: T, etag: Etag) -> Self {
        Self { value, etag }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Entity> Versioned<T> {
    /// Replace the stored row with `next` only if it is still at `self.etag`.
    pub fn compare_and_swap<S>(&self, store: &S, next: T) -> Result<Versioned<T>, StoreError>
    where
        S: EntityStore<T> + ?Sized,
    {
        let etag = store.replace(&next, self.etag)?;
        Ok(Versioned::new(next, etag))
    }

    /// Delete the stored row only if it is still at `self.etag`.
    pub fn delete_if_unchanged<S>(&self, store: &S) -> Result<bool, StoreError>
    where
        S: EntityStore<T> + ?Sized,
    {
        store.delete(
            &self.value.partition_key(),
            &self.value.row_key(),
            Some(self.etag),
        )
    }
}

impl<T> Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Conditional-write storage for one entity type.
///
/// Backends implement this once generically; the per-entity traits in this
/// crate add typed key helpers on top.
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Read a row. `NotFound` if absent.
    fn get(&self, partition: &str, row: &str) -> Result<Versioned<E>, StoreError>;

    /// Insert a new row. `Duplicate` if the key is taken.
    fn create(&self, entity: &E) -> Result<Etag, StoreError>;

    /// Overwrite a row only if its stored etag equals `expected`.
    /// `NotFound` if absent, `VersionConflict` on mismatch.
    fn replace(&self, entity: &E, expected: Etag) -> Result<Etag, StoreError>;

    /// Insert or overwrite unconditionally.
    fn upsert(&self, entity: &E) -> Result<Etag, StoreError>;

    /// Remove a row, optionally only at `expected`. Returns `false` if the
    /// row was already gone.
    fn delete(&self, partition: &str, row: &str, expected: Option<Etag>)
        -> Result<bool, StoreError>;

    /// All rows (optionally within one partition) matching `filter`, in key order.
    fn list_by_filter(
        &self,
        partition: Option<&str>,
        filter: &dyn Fn(&E) -> bool,
    ) -> Result<Vec<Versioned<E>>, StoreError>;

    /// Like [`get`](Self::get) but maps `NotFound` to `None`.
    fn find(&self, partition: &str, row: &str) -> Result<Option<Versioned<E>>, StoreError> {
        match self.get(partition, row) {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Build the display key used in error messages.
pub fn describe_key(table: &str, partition: &str, row: &str) -> String {
    format!("{table}/{partition}/{row}")
}
