use baton_store::StoreError;
use baton_types::TypesError;
use thiserror::Error;

/// Error groups a client can react to uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    /// Re-scan for a fresh token.
    ExpiredOrUsed,
    ProtocolViolation,
    Policy,
    Capacity,
    Authorization,
    Internal,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("token not found: {0}")]
    TokenNotFound(String),

    #[error("chain not found: {0}")]
    ChainNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("token has already been used")]
    TokenUsed,

    #[error("concurrent update, re-scan and retry")]
    VersionConflict,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("no pending challenge for this token")]
    NoPendingChallenge,

    #[error("challenge has expired")]
    ChallengeExpired,

    #[error("challenge code does not match")]
    InvalidChallenge,

    #[error("only the current holder may complete this hop")]
    NotHolder,

    #[error("cannot scan your own token")]
    SelfScan,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("location check failed: {0}")]
    LocationViolation(String),

    #[error("no eligible students")]
    NoStudents,

    #[error("insufficient eligible students: requested {requested}, available {available}")]
    InsufficientStudents { requested: usize, available: usize },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("student {0} is not enrolled in this session")]
    NotEnrolled(String),

    #[error("session has ended")]
    SessionEnded,

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Self::ChainNotFound(_) => "CHAIN_NOT_FOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenUsed => "TOKEN_USED",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::NoPendingChallenge => "NO_PENDING_CHALLENGE",
            Self::ChallengeExpired => "CHALLENGE_EXPIRED",
            Self::InvalidChallenge => "INVALID_CHALLENGE",
            Self::NotHolder => "NOT_HOLDER",
            Self::SelfScan => "SELF_SCAN",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::LocationViolation(_) => "LOCATION_VIOLATION",
            Self::NoStudents => "NO_STUDENTS",
            Self::InsufficientStudents { .. } => "INSUFFICIENT_STUDENTS",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotEnrolled(_) => "NOT_ENROLLED",
            Self::SessionEnded => "SESSION_ENDED",
            Self::Store(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TokenNotFound(_) | Self::ChainNotFound(_) | Self::SessionNotFound(_) => {
                ErrorCategory::NotFound
            }
            Self::TokenExpired | Self::TokenUsed | Self::VersionConflict => {
                ErrorCategory::ExpiredOrUsed
            }
            Self::InvalidToken(_)
            | Self::NoPendingChallenge
            | Self::ChallengeExpired
            | Self::InvalidChallenge
            | Self::NotHolder
            | Self::SelfScan
            | Self::InvalidRequest(_) => ErrorCategory::ProtocolViolation,
            Self::RateLimited(_) | Self::LocationViolation(_) => ErrorCategory::Policy,
            Self::NoStudents | Self::InsufficientStudents { .. } => ErrorCategory::Capacity,
            Self::Forbidden(_) | Self::NotEnrolled(_) | Self::SessionEnded => {
                ErrorCategory::Authorization
            }
            Self::Store(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict { .. } => RelayError::VersionConflict,
            other => RelayError::Store(other),
        }
    }
}

impl From<TypesError> for RelayError {
    fn from(e: TypesError) -> Self {
        RelayError::Internal(e.to_string())
    }
}
