//! HTTP error responses.
//!
//! Every handler returns `Result<_, ApiError>`. The response body is always
//! `{"error": "<kind>", "message": "<text>"}`.

use axum::{
    Json,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::admins::password::PasswordError;
use crate::database::StorageError;
use crate::verification::VerificationError;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Constraint(String),

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Verification code has expired")]
    CodeExpired,

    #[error("{0}")]
    Dispatch(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Constraint(_) => StatusCode::CONFLICT,
            Self::InvalidCode | Self::CodeExpired | Self::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Dispatch(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Constraint(_) => "constraint_violation",
            Self::InvalidCode => "invalid_code",
            Self::CodeExpired => "code_expired",
            Self::Dispatch(_) => "dispatch_error",
            Self::RateLimited(_) => "rate_limited",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::warn!(kind = self.kind(), error = %self, "Request rejected");
        }

        // Internal details stay in the logs.
        let message = match &self {
            Self::Internal(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: self.kind().to_owned(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// `Json` whose rejections are reported as `validation_error` bodies.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::NotFound(err.to_string()),
            StorageError::Constraint(msg) => Self::Constraint(msg),
            StorageError::InvalidInput(msg) => Self::Validation(msg),
            StorageError::Database(msg) => Self::Internal(msg),
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::InvalidEmail(msg) => Self::Validation(msg),
            VerificationError::InvalidCode => Self::InvalidCode,
            VerificationError::CodeExpired => Self::CodeExpired,
            VerificationError::Dispatch(e) => Self::Dispatch(format!("Failed to send email: {e}")),
            err @ VerificationError::TooManyAttempts(_) => Self::RateLimited(err.to_string()),
            VerificationError::Storage(e) => e.into(),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("Failed to sign session token: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> ErrorResponse {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::validation("x"), StatusCode::BAD_REQUEST, "validation_error"),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::Constraint("x".into()), StatusCode::CONFLICT, "constraint_violation"),
            (ApiError::InvalidCode, StatusCode::UNAUTHORIZED, "invalid_code"),
            (ApiError::CodeExpired, StatusCode::UNAUTHORIZED, "code_expired"),
            (ApiError::Dispatch("x".into()), StatusCode::BAD_GATEWAY, "dispatch_error"),
            (ApiError::RateLimited("x".into()), StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "unauthorized"),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN, "forbidden"),
            (ApiError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        ];

        for (error, status, kind) in cases {
            assert_eq!(error.status(), status);
            assert_eq!(error.kind(), kind);
        }
    }

    #[test]
    fn test_storage_error_conversion() {
        let not_found: ApiError = StorageError::not_found("plan", "p-1").into();
        let constraint: ApiError = StorageError::Constraint("dup".into()).into();
        let database: ApiError = StorageError::Database("boom".into()).into();

        assert!(matches!(not_found, ApiError::NotFound(ref m) if m == "plan not found: p-1"));
        assert!(matches!(constraint, ApiError::Constraint(_)));
        assert!(matches!(database, ApiError::Internal(_)));
    }

    #[tokio::test]
    async fn test_internal_details_hidden() {
        let response = ApiError::internal("connection refused at 10.0.0.3").into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_of(response).await;
        assert_eq!(body.error, "internal_error");
        assert!(!body.message.contains("10.0.0.3"));
    }

    #[tokio::test]
    async fn test_client_error_body() {
        let body = body_of(ApiError::validation("trip_name is required").into_response()).await;

        assert_eq!(body.error, "validation_error");
        assert_eq!(body.message, "trip_name is required");
    }
}
