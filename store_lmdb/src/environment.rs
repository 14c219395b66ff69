//! LMDB environment setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::meta;
use crate::LmdbError;

const ENTITIES_DB: &str = "entities";
const META_DB: &str = "meta";
const MAX_DBS: u32 = 4;

/// Default map size: 1 GiB. LMDB only reserves address space.
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Wraps the LMDB environment and its database handles.
pub struct LmdbEnvironment {
    pub(crate) env: Arc<Env>,
    pub(crate) entities: Database<Bytes, Bytes>,
    pub(crate) meta: Database<Bytes, Bytes>,
    path: PathBuf,
}

impl LmdbEnvironment {
    /// Open or create an LMDB environment at `path`, creating the directory
    /// if needed and checking the on-disk schema version.
    pub fn open(path: &Path, map_size: usize) -> Result<Self, LmdbError> {
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per path by this process and
        // never while another handle to the same files is being resized.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let entities: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(ENTITIES_DB))?;
        let meta_db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(META_DB))?;
        meta::ensure_schema_version(&mut wtxn, meta_db)?;
        wtxn.commit()?;

        tracing::info!(path = %path.display(), map_size, "opened LMDB environment");

        Ok(Self {
            env: Arc::new(env),
            entities,
            meta: meta_db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The schema version stamped on disk.
    pub fn schema_version(&self) -> Result<u32, LmdbError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .meta
            .get(&rtxn, meta::SCHEMA_VERSION_KEY)?
            .ok_or_else(|| LmdbError::NotFound("meta key 'schema_version'".to_string()))?;
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| LmdbError::Serialization("schema version is not 4 bytes".to_string()))?;
        Ok(u32::from_le_bytes(arr))
    }

    /// Number of rows across every table.
    pub fn row_count(&self) -> Result<u64, LmdbError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.entities.len(&rtxn)?)
    }
}
