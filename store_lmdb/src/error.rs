use baton_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("version conflict on {key}: expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema version mismatch: on disk {found}, expected {expected}")]
    SchemaMismatch { expected: u32, found: u32 },
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        LmdbError::Heed(e.to_string())
    }
}

impl From<bincode::Error> for LmdbError {
    fn from(e: bincode::Error) -> Self {
        LmdbError::Serialization(e.to_string())
    }
}

impl From<LmdbError> for StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::NotFound(key) => StoreError::NotFound(key),
            LmdbError::Duplicate(key) => StoreError::Duplicate(key),
            LmdbError::Conflict {
                key,
                expected,
                found,
            } => StoreError::VersionConflict {
                key,
                expected,
                found,
            },
            LmdbError::Serialization(msg) => StoreError::Serialization(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
