//! Session JWT authentication.
//!
//! Two kinds of session token are issued, both HS256-signed with the
//! server's `JWT_SECRET`:
//!
//! - user tokens from `/user/verifyotp`, with the verified email as `sub`
//! - admin tokens from `/admin/login`, with the admin username as `sub`
//!
//! The `role` claim tells them apart. [`RequireAuth`] accepts only user
//! tokens and [`RequireAdmin`] only admin tokens.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiawpao_services::auth::RequireAuth;
//!
//! async fn protected_handler(auth: RequireAuth) -> impl IntoResponse {
//!     format!("Hello, {}!", auth.email())
//! }
//! ```
//!
//! Clients send the token as `Authorization: Bearer <token>`.

use axum::{
    Json,
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::email::normalize_address;
use crate::error::ApiError;

/// The `iss` claim of every token this service issues.
pub const ISSUER: &str = "tiawpao";

/// Who a session token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Email for user tokens, username for admin tokens.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub role: Role,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or_default()
}

/// Signs a session token for `subject` valid for `ttl`.
pub fn generate_session_token(
    subject: &str,
    role: Role,
    jwt_secret: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = unix_now();
    let claims = SessionClaims {
        sub: subject.to_owned(),
        iat: now,
        exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        iss: ISSUER.to_owned(),
        role,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
}

/// Validate a session token and return its claims.
pub fn validate_session_token(token: &str, jwt_secret: &str) -> Result<SessionClaims, String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => "Token has expired".to_owned(),
        jsonwebtoken::errors::ErrorKind::InvalidSignature => "Invalid token signature".to_owned(),
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => "Invalid token issuer".to_owned(),
        _ => format!("Token validation failed: {e}"),
    })?;

    Ok(token_data.claims)
}

/// Rejection for missing or unacceptable session tokens. Always 401.
#[derive(Debug, Serialize)]
pub struct SessionAuthError {
    pub error: &'static str,
    pub message: String,
}

impl SessionAuthError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            error: "unauthorized",
            message: message.into(),
        }
    }

    fn missing_token() -> Self {
        Self::new("Authorization header with Bearer token is required")
    }

    fn invalid_format() -> Self {
        Self::new("Authorization header must be in format: Bearer <token>")
    }

    fn wrong_role(expected: Role) -> Self {
        match expected {
            Role::User => Self::new("A user session token is required"),
            Role::Admin => Self::new("An admin session token is required"),
        }
    }

    fn missing_config() -> Self {
        Self::new("Server configuration error")
    }
}

impl IntoResponse for SessionAuthError {
    fn into_response(self) -> Response {
        tracing::warn!(reason = %self.message, "Rejected session token");
        (StatusCode::UNAUTHORIZED, Json(self)).into_response()
    }
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    let header_value = headers.get(AUTHORIZATION)?;
    let header_str = header_value.to_str().ok()?;

    let stripped = header_str.strip_prefix("Bearer ")?;
    if stripped.is_empty() {
        return None;
    }
    Some(stripped)
}

/// Reads and validates the token on a request, requiring `role`.
fn claims_from_parts(parts: &Parts, role: Role) -> Result<SessionClaims, SessionAuthError> {
    let config = parts
        .extensions
        .get::<Config>()
        .ok_or_else(SessionAuthError::missing_config)?;

    let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
        if parts.headers.contains_key(AUTHORIZATION) {
            SessionAuthError::invalid_format()
        } else {
            SessionAuthError::missing_token()
        }
    })?;

    let claims = validate_session_token(token, config.jwt_secret()).map_err(SessionAuthError::new)?;
    if claims.role != role {
        return Err(SessionAuthError::wrong_role(role));
    }

    Ok(claims)
}

/// An authenticated user, identified by the email they verified.
#[derive(Debug, Clone)]
pub struct RequireAuth {
    claims: SessionClaims,
}

impl RequireAuth {
    pub fn email(&self) -> &str {
        &self.claims.sub
    }

    pub fn claims(&self) -> &SessionClaims {
        &self.claims
    }

    /// Fails with 403 unless the session belongs to `email`.
    pub fn ensure_email(&self, email: &str) -> Result<(), ApiError> {
        if normalize_address(self.email()) == normalize_address(email) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Session does not belong to this account"))
        }
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = SessionAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = claims_from_parts(parts, Role::User)?;
        Ok(Self { claims })
    }
}

/// `Option<RequireAuth>`: no `Authorization` header means anonymous, but a
/// header that is present must carry a valid user token.
impl<S> OptionalFromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = SessionAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        let claims = claims_from_parts(parts, Role::User)?;
        Ok(Some(Self { claims }))
    }
}

/// An authenticated administrator.
#[derive(Debug, Clone)]
pub struct RequireAdmin {
    claims: SessionClaims,
}

impl RequireAdmin {
    pub fn username(&self) -> &str {
        &self.claims.sub
    }
}

impl<S> FromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = SessionAuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = claims_from_parts(parts, Role::Admin)?;
        Ok(Self { claims })
    }
}

impl<S> OptionalFromRequestParts<S> for RequireAdmin
where
    S: Send + Sync,
{
    type Rejection = SessionAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        let claims = claims_from_parts(parts, Role::Admin)?;
        Ok(Some(Self { claims }))
    }
}
