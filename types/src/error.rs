//! Parse and environment errors shared across crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("unknown phase: {0}")]
    InvalidPhase(String),

    #[error("unknown role: {0}")]
    InvalidRole(String),

    #[error("unknown token kind: {0}")]
    InvalidTokenKind(String),

    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("randomness source unavailable: {0}")]
    Randomness(String),
}
