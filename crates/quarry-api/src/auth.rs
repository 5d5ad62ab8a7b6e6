//! Caller identity.
//!
//! Sessions are authenticated upstream; requests reach this server with the
//! resolved user id in the `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated user making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", USER_ID_HEADER)))?;
        let user_id = value
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("Invalid {} header encoding", USER_ID_HEADER)))?
            .trim();
        if user_id.is_empty() {
            return Err(ApiError::Unauthorized(format!("Empty {} header", USER_ID_HEADER)));
        }
        Ok(CallerId(user_id.to_string()))
    }
}
