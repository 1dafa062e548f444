//! Request extractors.
//!
//! Authentication is an upstream collaborator: the edge gateway verifies
//! the session and forwards the account id in `X-User-Id`. Handlers only
//! ever see the already-verified identity.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Verified account id attached by the upstream gateway.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .map(AuthUser)
            .ok_or(ApiError::Unauthorized)
    }
}
