//! Caller identity forwarded by the authenticating proxy.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::UserId;
use domain::Role;
use services::Caller;
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller. A missing role header means a plain user.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Caller);

impl Identity {
    pub fn user_id(&self) -> UserId {
        self.0.user_id
    }
}

fn from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let user_id = header(USER_ID_HEADER)
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .map(UserId::from_uuid)
        .ok_or_else(|| ApiError::Unauthorized("Missing or invalid user identity".to_string()))?;

    let role = match header(USER_ROLE_HEADER) {
        None => Role::User,
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ApiError::Unauthorized(format!("Unknown role: {value}")))?,
    };

    Ok(Caller::new(user_id, role))
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        from_headers(&parts.headers).map(Identity)
    }
}
