use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::registry::RegistryError;
use crate::types::ApiResponse;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Signature, timestamp, or nonce verification failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Replay detected: nonce already used")]
    ReplayDetected,

    #[error("Request timestamp outside the accepted window")]
    TimestampInvalid,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable failure code carried in the response envelope.
    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::ReplayDetected => "replay_detected",
            ApiError::TimestampInvalid => "timestamp_invalid",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Registry(e) => e.code(),
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_)
            | ApiError::ReplayDetected
            | ApiError::TimestampInvalid => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Registry(e) => match e {
                RegistryError::Unauthorized => StatusCode::FORBIDDEN,
                RegistryError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
                RegistryError::NotOnboarded | RegistryError::NotMember => StatusCode::NOT_FOUND,
                RegistryError::NotPrimary
                | RegistryError::SelfRemovalNotAllowed
                | RegistryError::PrimaryCannotLeave => StatusCode::FORBIDDEN,
                RegistryError::AlreadyInitialized
                | RegistryError::AlreadyOnboarded
                | RegistryError::AlreadyHasMembership
                | RegistryError::GroupMismatch => StatusCode::CONFLICT,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            ApiError::Unauthorized(_) => {
                Some("Sign the request payload with your wallet key and include public_key, timestamp, and nonce")
            }
            ApiError::ReplayDetected => Some("Generate a fresh nonce for every request"),
            ApiError::Registry(RegistryError::AlreadyHasMembership) => {
                Some("A wallet must leave its current group before joining another")
            }
            ApiError::Registry(RegistryError::PrimaryCannotLeave) => {
                Some("Transfer primary ownership first, then leave")
            }
            ApiError::Registry(RegistryError::SelfRemovalNotAllowed) => {
                Some("Use the leave operation for self-removal")
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        let body = if let Some(hint) = self.hint() {
            ApiResponse::<()>::error_with_hint(message, code, hint)
        } else {
            ApiResponse::<()>::error(message, code)
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
