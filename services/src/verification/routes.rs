//! Passcode endpoints, mounted under `/api/v1/user`.
//!
//! - `GET /genotp/{email}`: email a fresh code to the address
//! - `POST /verifyotp`: trade a valid code for a user session token

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Role, generate_session_token};
use crate::config::Config;
use crate::database::Storage;
use crate::email::Mailer;
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

/// Response for a code request. The code itself is only ever emailed.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateOtpResponse {
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub email: String,
    /// User session token (`Bearer`).
    pub token: String,
    pub expires_in: u64,
    /// Whether a user account already exists for the email.
    pub registered: bool,
}

pub fn verification_routes<S, M>() -> Router<AppState<S, M>>
where
    S: Storage,
    M: Mailer,
{
    Router::new()
        .route("/genotp/{email}", get(generate_otp::<S, M>))
        .route("/verifyotp", post(verify_otp::<S, M>))
}

#[tracing::instrument(skip_all)]
async fn generate_otp<S, M>(
    State(state): State<AppState<S, M>>,
    Path(email): Path<String>,
) -> Result<Json<GenerateOtpResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let issued = state.verification.request_code(&email).await?;

    Ok(Json(GenerateOtpResponse {
        email: issued.email,
        expires_at: issued.expires_at,
        message: "Verification code sent".to_owned(),
    }))
}

#[tracing::instrument(skip_all)]
async fn verify_otp<S, M>(
    State(state): State<AppState<S, M>>,
    Extension(config): Extension<Config>,
    ApiJson(payload): ApiJson<VerifyOtpRequest>,
) -> Result<Json<VerifyOtpResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let verified = state
        .verification
        .validate_code(&payload.email, &payload.otp)
        .await?;

    let registered = state
        .storage
        .get_user_by_email(&verified.email)
        .await?
        .is_some();

    let token = generate_session_token(
        &verified.email,
        Role::User,
        config.jwt_secret(),
        config.session_ttl(),
    )?;

    tracing::info!(registered, "Issued user session");

    Ok(Json(VerifyOtpResponse {
        email: verified.email,
        token,
        expires_in: config.session_ttl().as_secs(),
        registered,
    }))
}
