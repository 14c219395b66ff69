//! Blake2b selection scores.
//!
//! Seed holders are ranked by `blake2b(tag || seed || candidate)`. The tag
//! keeps these digests distinct from any other Blake2b use.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

const SELECTION_TAG: &[u8] = b"baton/selection/v1";

/// Score one candidate under a sampling seed. Lower scores win.
pub fn selection_score(seed: &[u8; 32], candidate: &str) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(SELECTION_TAG);
    hasher.update(seed);
    hasher.update(candidate.as_bytes());
    let mut score = [0u8; 32];
    score.copy_from_slice(&hasher.finalize());
    score
}
