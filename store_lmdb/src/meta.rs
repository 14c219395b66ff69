//! Schema bookkeeping kept in the `meta` database.

use heed::types::Bytes;
use heed::{Database, RwTxn};

use crate::LmdbError;

pub(crate) const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// Bumped whenever the row encoding changes incompatibly.
pub const SCHEMA_VERSION: u32 = 1;

/// Stamp a fresh environment with [`SCHEMA_VERSION`], or reject one written
/// with a different version.
pub(crate) fn ensure_schema_version(
    wtxn: &mut RwTxn<'_>,
    meta: Database<Bytes, Bytes>,
) -> Result<(), LmdbError> {
    let stored = match meta.get(&*wtxn, SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let arr: [u8; 4] = bytes.try_into().map_err(|_| {
                LmdbError::Serialization(format!(
                    "schema version has {} bytes, expected 4",
                    bytes.len()
                ))
            })?;
            Some(u32::from_le_bytes(arr))
        }
        None => None,
    };

    match stored {
        Some(found) if found != SCHEMA_VERSION => Err(LmdbError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
        Some(_) => Ok(()),
        None => {
            meta.put(wtxn, SCHEMA_VERSION_KEY, &SCHEMA_VERSION.to_le_bytes())?;
            Ok(())
        }
    }
}
