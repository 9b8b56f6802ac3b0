//! Caller identity forwarded by the API gateway.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::domain::aggregates::Role;
use crate::services::Caller;
use crate::ReturnsError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ReturnsError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| ReturnsError::Unauthorized("Authentication required".into()))
            .and_then(|raw| Uuid::parse_str(raw).map_err(|_| ReturnsError::Unauthorized("Invalid user identity".into())))?;
        let role = match header(parts, USER_ROLE_HEADER) {
            None => Role::Customer,
            Some(raw) => raw.parse().map_err(|_| ReturnsError::Unauthorized("Invalid user role".into()))?,
        };
        Ok(Caller { user_id, role })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}
