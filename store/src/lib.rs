//! Entity records and abstract storage traits for Baton.
//!
//! Every storage backend (LMDB, in-memory for testing) implements
//! [`EntityStore`] once generically. The rest of the workspace depends only
//! on the traits, usually through the [`AttendanceStore`] bundle.

pub mod attendance;
pub mod chain;
pub mod entity;
pub mod error;
pub mod history;
pub mod scan_log;
pub mod session;
pub mod token;

pub use attendance::{AttendanceRecord, AttendanceRecordStore};
pub use chain::{ChainRecord, ChainStore};
pub use entity::{describe_key, Entity, EntityStore, Etag, Versioned};
pub use error::StoreError;
pub use history::{HistoryEntry, HistoryStore, HopKind};
pub use scan_log::{ScanLogEntry, ScanLogStore, ScanOperation};
pub use session::{SessionRecord, SessionStore, SESSION_PARTITION};
pub use token::{PendingChallenge, TokenKind, TokenRecord, TokenStore};

/// A backend that stores every Baton entity.
pub trait AttendanceStore:
    EntityStore<SessionRecord>
    + EntityStore<AttendanceRecord>
    + EntityStore<ChainRecord>
    + EntityStore<TokenRecord>
    + EntityStore<HistoryEntry>
    + EntityStore<ScanLogEntry>
    + Send
    + Sync
{
}

impl<T> AttendanceStore for T where
    T: EntityStore<SessionRecord>
        + EntityStore<AttendanceRecord>
        + EntityStore<ChainRecord>
        + EntityStore<TokenRecord>
        + EntityStore<HistoryEntry>
        + EntityStore<ScanLogEntry>
        + Send
        + Sync
{
}
