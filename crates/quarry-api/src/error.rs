//! API error types and JSON error response formatting.
//!
//! ApiError gives every endpoint the same `{error, message}` body and maps
//! engine errors to HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use quarry_chat::ChatError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - caller identity missing.
    Unauthorized(String),
    /// 404 Not Found - resource does not exist or belongs to someone else.
    NotFound(String),
    /// 409 Conflict - a turn is running or credentials are already set.
    Conflict(String),
    /// 422 Unprocessable Entity - the database could not be introspected.
    UnprocessableEntity(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - the generation service failed or misbehaved.
    BadGateway(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (error_code, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::UnprocessableEntity(msg) => ("unprocessable_entity", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
            ApiError::BadGateway(msg) => ("bad_gateway", msg),
        };
        ErrorBody {
            error: error_code.to_string(),
            message: message.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let message = err.to_string();
        match err {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) => ApiError::BadRequest(message),
            ChatError::SessionNotFound(_) => ApiError::NotFound(message),
            ChatError::TurnInProgress | ChatError::CredentialConflict => ApiError::Conflict(message),
            ChatError::SchemaIntrospection(_) => ApiError::UnprocessableEntity(message),
            ChatError::Stream(_)
            | ChatError::StreamTimeout(_)
            | ChatError::UnknownTool(_)
            | ChatError::ToolLimitExceeded
            | ChatError::Llm(_) => ApiError::BadGateway(message),
            ChatError::Storage(_) | ChatError::InvalidTransition(..) => ApiError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_status_mapping() {
        let cases = [
            (ChatError::EmptyMessage, StatusCode::BAD_REQUEST),
            (ChatError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (ChatError::TurnInProgress, StatusCode::CONFLICT),
            (ChatError::CredentialConflict, StatusCode::CONFLICT),
            (ChatError::SchemaIntrospection("no such file".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ChatError::StreamTimeout(60), StatusCode::BAD_GATEWAY),
            (ChatError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_body_keeps_engine_message() {
        let body = ApiError::from(ChatError::CredentialConflict).body();
        assert_eq!(body.error, "conflict");
        assert_eq!(body.message, "Database URL and auth token already set.");
    }
}
