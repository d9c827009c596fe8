//! Engine error types.
//!
//! Every state-machine operation returns [`EngineError`]. Callers map the
//! coarse [`ErrorKind`] onto their own surface (the API layer uses
//! [`ErrorKind::http_status`]); nothing in the engine retries a failed
//! transition on its own.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during round, match, turn and timer operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`round`, `match`, `turn`, `timer`, `score_lock`).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A status precondition was violated.
    #[error("{entity} {id} in status {from} cannot {requested}: {reason}")]
    InvalidStateTransition {
        /// Entity kind.
        entity: &'static str,
        /// The entity identifier.
        id: String,
        /// Current status.
        from: String,
        /// The rejected action, e.g. `move to LIVE` or `advance turn`.
        requested: String,
        /// Which invariant failed.
        reason: String,
    },

    /// The operation would create a duplicate or collides with concurrent
    /// progress.
    #[error("{entity} {id}: conflict: {reason}")]
    Conflict {
        /// Entity kind.
        entity: &'static str,
        /// The entity identifier.
        id: String,
        /// Which invariant failed.
        reason: String,
    },

    /// Malformed input or an unmet business rule.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// The offending field or rule.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A frozen result no longer matches its recorded hash.
    #[error("integrity violation for match {match_id}: stored {stored_hash}, computed {computed_hash}")]
    IntegrityViolation {
        /// The match whose freeze record was checked.
        match_id: String,
        /// Hash recorded at freeze time.
        stored_hash: String,
        /// Hash recomputed from current state.
        computed_hash: String,
    },

    /// The database lock could not be acquired within the configured timeout.
    #[error("lock timeout: database busy, retry the request")]
    LockTimeout,

    /// A persisted value could not be decoded.
    #[error("corrupt row in {table}: {detail}")]
    CorruptRow {
        /// Table the row was read from.
        table: &'static str,
        /// What could not be decoded.
        detail: String,
    },

    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Storage(rusqlite::Error),

    /// JSON encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _)
                if matches!(
                    inner.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Self::LockTimeout
            },
            _ => Self::Storage(err),
        }
    }
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity missing.
    NotFound,
    /// Status precondition violated.
    InvalidStateTransition,
    /// Duplicate resource or concurrent progress.
    Conflict,
    /// Malformed input or unmet business rule.
    Validation,
    /// Hash mismatch on verify.
    IntegrityViolation,
    /// Contended lock; safe to retry.
    Unavailable,
    /// Storage or encoding failure.
    Internal,
}

impl ErrorKind {
    /// Status code the presentation layer surfaces for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidStateTransition | Self::Conflict | Self::IntegrityViolation => 409,
            Self::Validation => 400,
            Self::Unavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl EngineError {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            Self::LockTimeout => ErrorKind::Unavailable,
            Self::CorruptRow { .. } | Self::Storage(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            },
        }
    }

    /// Returns `true` if the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout)
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_transition(
        entity: &'static str,
        id: impl ToString,
        from: impl ToString,
        requested: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            entity,
            id: id.to_string(),
            from: from.to_string(),
            requested: requested.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(
        entity: &'static str,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
