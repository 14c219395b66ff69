//! Cryptographic primitives for the Baton relay.
//!
//! - **Blake2b** for deterministic selection scores
//! - **HMAC-SHA256** for challenge-code derivation and storage hashes

pub mod challenge;
pub mod hash;

pub use challenge::{challenge_code_hash, derive_challenge_code, verify_challenge_code, CODE_DIGITS};
pub use hash::selection_score;
