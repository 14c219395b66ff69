//! Randomness seam for identifiers and student sampling.

use crate::TypesError;

pub trait RandomSource: Send + Sync {
    /// Fill `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), TypesError>;

    /// A fresh 32-byte seed.
    fn seed(&self) -> Result<[u8; 32], TypesError> {
        let mut seed = [0u8; 32];
        self.fill(&mut seed)?;
        Ok(seed)
    }

    /// A random identifier: `prefix` followed by 16 random bytes in hex.
    fn identifier(&self, prefix: &str) -> Result<String, TypesError> {
        let mut bytes = [0u8; 16];
        self.fill(&mut bytes)?;
        Ok(format!("{prefix}{}", hex::encode(&bytes)))
    }
}

/// Operating-system entropy via `getrandom`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TypesError> {
        getrandom::getrandom(buf).map_err(|e| TypesError::Randomness(e.to_string()))
    }
}

// Inline hex encoding to avoid adding the `hex` crate as a dependency of types.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
