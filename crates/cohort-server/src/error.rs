use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cohort_shared::ErrorCode;
use cohort_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store could not answer in time, or its worker failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The connection is not subscribed to the channel it addressed.
    #[error("Not subscribed to {0}")]
    NotSubscribed(String),

    #[error("Missing or invalid identity: {0}")]
    Unauthenticated(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Store(e) => e.code(),
            ServerError::Unavailable(_) => ErrorCode::Unavailable,
            ServerError::NotSubscribed(_) | ServerError::Unauthenticated(_) => {
                ErrorCode::PermissionDenied
            }
            ServerError::BadRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Text safe to hand to a client. Store failures are logged here and
    /// reported generically.
    pub fn client_message(&self) -> String {
        match self.code() {
            ErrorCode::Unavailable => {
                tracing::error!(error = %self, "request failed");
                "Service temporarily unavailable".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match (&self, code) {
            (ServerError::Unauthenticated(_), _) => StatusCode::UNAUTHORIZED,
            (_, ErrorCode::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorCode::PermissionDenied)
            | (_, ErrorCode::CannotRemoveOwner)
            | (_, ErrorCode::OwnerMustDelete) => StatusCode::FORBIDDEN,
            (_, ErrorCode::Full) | (_, ErrorCode::AlreadyMember) | (_, ErrorCode::Conflict) => {
                StatusCode::CONFLICT
            }
            (_, ErrorCode::InvalidTransition) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorCode::InvalidRequest) => StatusCode::BAD_REQUEST,
            (_, ErrorCode::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.client_message(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_shared::role::Denied;
    use cohort_shared::types::SessionStatus;

    fn status_of(err: ServerError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(StoreError::NotFound("room").into()), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(StoreError::Denied(Denied::CannotRemoveOwner).into()),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_of(StoreError::Full.into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(
                StoreError::InvalidTransition {
                    from: SessionStatus::Completed,
                    to: SessionStatus::Active,
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ServerError::Unavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ServerError::Unauthenticated("x-user-id".into())),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_store_failures_are_not_leaked() {
        let err = ServerError::Store(StoreError::Migration("table users exists".into()));
        assert_eq!(err.code(), ErrorCode::Unavailable);
        assert_eq!(err.client_message(), "Service temporarily unavailable");
    }
}
