//! Request identity.
//!
//! An upstream gateway authenticates the caller and forwards the result in
//! trusted headers. Every handler that acts on behalf of a user takes a
//! [`CurrentUser`], which also keeps the local user row in sync.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ServerError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
}

impl CurrentUser {
    /// Read the identity headers. Only the id is mandatory; a missing name
    /// falls back to a placeholder.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServerError> {
        let id = header(headers, USER_ID_HEADER)
            .ok_or_else(|| ServerError::Unauthenticated(format!("missing {USER_ID_HEADER}")))?;
        let id = Uuid::parse_str(id)
            .map_err(|e| ServerError::Unauthenticated(format!("invalid {USER_ID_HEADER}: {e}")))?;

        let name = header(headers, USER_NAME_HEADER)
            .unwrap_or("Anonymous")
            .to_string();
        let email = header(headers, USER_EMAIL_HEADER).map(str::to_string);

        Ok(Self { id, name, email })
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = Self::from_headers(&parts.headers)?;

        let (id, name, email) = (user.id, user.name.clone(), user.email.clone());
        state
            .store
            .call(move |db| db.upsert_user(id, &name, email.as_deref()))
            .await?;

        Ok(user)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
