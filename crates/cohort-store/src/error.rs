use cohort_shared::error::ParseEnumError;
use cohort_shared::role::Denied;
use cohort_shared::types::SessionStatus;
use cohort_shared::ErrorCode;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The named record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A role check refused the operation.
    #[error(transparent)]
    Denied(#[from] Denied),

    /// The room is at capacity.
    #[error("Room is full")]
    Full,

    #[error("User is already a member")]
    AlreadyMember,

    /// The session is not in the state the transition starts from.
    #[error("Session is {from}; cannot move to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Unique-constraint race or competing state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rejected input.
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// A stored enum column did not parse.
    #[error("Corrupt column: {0}")]
    Enum(#[from] ParseEnumError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Client-facing category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::Denied(d) => d.code(),
            StoreError::Full => ErrorCode::Full,
            StoreError::AlreadyMember => ErrorCode::AlreadyMember,
            StoreError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            StoreError::Conflict(_) => ErrorCode::Conflict,
            StoreError::Invalid(_) => ErrorCode::InvalidRequest,
            StoreError::Sqlite(_)
            | StoreError::Io(_)
            | StoreError::Migration(_)
            | StoreError::Enum(_)
            | StoreError::Json(_) => ErrorCode::Unavailable,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map `QueryReturnedNoRows` to a typed `NotFound`.
pub(crate) fn not_found(what: &'static str) -> impl FnOnce(rusqlite::Error) -> StoreError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
        other => StoreError::Sqlite(other),
    }
}

/// `true` when the statement hit a UNIQUE index (as opposed to a PK,
/// NOT NULL or foreign-key violation).
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
