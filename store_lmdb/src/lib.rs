//! LMDB storage backend for Baton.
//!
//! Implements [`baton_store::EntityStore`] for every entity type using the
//! `heed` LMDB bindings. All tables share one LMDB database keyed by
//! `table \0 partition \0 row`.

pub mod environment;
pub mod error;
mod keys;
pub mod meta;
pub mod store;

pub use environment::{LmdbEnvironment, DEFAULT_MAP_SIZE};
pub use error::LmdbError;
pub use store::LmdbStore;
