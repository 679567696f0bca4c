use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure categories reported to clients, both over HTTP and in `error`
/// events on the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Room, session, content or user absent.
    NotFound,
    /// Role insufficient for the requested mutation.
    PermissionDenied,
    /// Room at capacity.
    Full,
    AlreadyMember,
    CannotRemoveOwner,
    OwnerMustDelete,
    /// Session status change that would skip or repeat a step.
    InvalidTransition,
    /// Unique constraint race or overlapping active session.
    Conflict,
    /// Malformed payload or out-of-range field.
    InvalidRequest,
    /// Store or transport failure.
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::Full => "full",
            ErrorCode::AlreadyMember => "already_member",
            ErrorCode::CannotRemoveOwner => "cannot_remove_owner",
            ErrorCode::OwnerMustDelete => "owner_must_delete",
            ErrorCode::InvalidTransition => "invalid_transition",
            ErrorCode::Conflict => "conflict",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Unavailable => "unavailable",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored enum column held a value this build does not know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed event: {0}")]
    Decode(#[from] serde_json::Error),
}
