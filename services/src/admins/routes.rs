//! Admin endpoints, mounted under `/api/v1/admin`.
//!
//! The very first admin can register without a token. After that only an
//! existing admin can add another one.

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::password::{hash_password, verify_password};
use crate::auth::{RequireAdmin, Role, generate_session_token};
use crate::config::Config;
use crate::database::Storage;
use crate::email::Mailer;
use crate::error::{ApiError, ApiJson};
use crate::plans::Plan;
use crate::state::AppState;
use crate::users::User;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminLoginResponse {
    pub username: String,
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: String,
    pub deleted: bool,
}

pub fn admin_routes<S, M>() -> Router<AppState<S, M>>
where
    S: Storage,
    M: Mailer,
{
    Router::new()
        .route("/register", post(register_admin::<S, M>))
        .route("/login", post(login::<S, M>))
        .route("/getAllUsers", get(list_users::<S, M>))
        .route("/getAllPlans", get(list_plans::<S, M>))
        .route("/deleteuser/{email}", delete(delete_user::<S, M>))
        .route("/deleteplan/{id}", delete(delete_plan::<S, M>))
}

fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid username or password".to_owned())
}

#[tracing::instrument(skip_all, fields(username = %payload.username))]
async fn register_admin<S, M>(
    State(state): State<AppState<S, M>>,
    caller: Option<RequireAdmin>,
    ApiJson(payload): ApiJson<AdminCredentials>,
) -> Result<(StatusCode, Json<AdminResponse>), ApiError>
where
    S: Storage,
    M: Mailer,
{
    if caller.is_none() && state.storage.count_admins().await? > 0 {
        return Err(ApiError::Unauthorized(
            "An admin session token is required".to_owned(),
        ));
    }

    let username = payload.username.trim().to_owned();
    if username.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("hashing task failed: {e}")))??;

    let admin = state.storage.create_admin(&username, &password_hash).await?;
    tracing::info!(
        created_by = caller.as_ref().map(|c| c.username()).unwrap_or("<bootstrap>"),
        "Registered admin"
    );

    Ok((
        StatusCode::CREATED,
        Json(AdminResponse {
            username: admin.username,
            created_at: admin.created_at,
        }),
    ))
}

#[tracing::instrument(skip_all, fields(username = %payload.username))]
async fn login<S, M>(
    State(state): State<AppState<S, M>>,
    Extension(config): Extension<Config>,
    ApiJson(payload): ApiJson<AdminCredentials>,
) -> Result<Json<AdminLoginResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let admin = state
        .storage
        .get_admin(payload.username.trim())
        .await?
        .ok_or_else(invalid_credentials)?;

    let stored_hash = admin.password_hash.clone();
    let password = payload.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| ApiError::internal(format!("verification task failed: {e}")))??;
    if !valid {
        return Err(invalid_credentials());
    }

    let token = generate_session_token(
        &admin.username,
        Role::Admin,
        config.jwt_secret(),
        config.session_ttl(),
    )?;
    tracing::info!("Admin logged in");

    Ok(Json(AdminLoginResponse {
        username: admin.username,
        token,
        expires_in: config.session_ttl().as_secs(),
    }))
}

#[tracing::instrument(skip_all)]
async fn list_users<S, M>(
    State(state): State<AppState<S, M>>,
    _admin: RequireAdmin,
) -> Result<Json<Vec<User>>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    Ok(Json(state.storage.list_users().await?))
}

#[tracing::instrument(skip_all)]
async fn list_plans<S, M>(
    State(state): State<AppState<S, M>>,
    _admin: RequireAdmin,
) -> Result<Json<Vec<Plan>>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    Ok(Json(state.storage.list_plans().await?))
}

#[tracing::instrument(skip_all)]
async fn delete_user<S, M>(
    State(state): State<AppState<S, M>>,
    admin: RequireAdmin,
    Path(email): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    if !state.storage.delete_user(&email).await? {
        return Err(ApiError::not_found(format!("user not found: {email}")));
    }
    tracing::info!(admin = admin.username(), "Admin deleted user");

    Ok(Json(DeletedResponse {
        id: email,
        deleted: true,
    }))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn delete_plan<S, M>(
    State(state): State<AppState<S, M>>,
    admin: RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    if !state.storage.delete_plan(&id).await? {
        return Err(ApiError::not_found(format!("plan not found: {id}")));
    }
    tracing::info!(admin = admin.username(), "Admin deleted plan");

    Ok(Json(DeletedResponse {
        id,
        deleted: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admins::AdminStorage;
    use crate::auth::validate_session_token;
    use crate::error::ErrorResponse;
    use crate::test_support::{TestApp, json_request, read_json};
    use tower::ServiceExt;

    fn credentials(username: &str, password: &str) -> serde_json::Value {
        serde_json::json!({ "username": username, "password": password })
    }

    #[tokio::test]
    async fn test_first_admin_bootstraps_without_token() {
        let app = TestApp::new();

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                None,
                credentials("root", "s3cret-pass"),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = read_json(response).await;
        assert_eq!(body["username"], "root");
        assert!(body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_second_admin_needs_admin_token() {
        let app = TestApp::new();
        app.seed_admin("root", "s3cret-pass").await;

        let anonymous = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                None,
                credentials("second", "another-pass"),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let user_token = app.user_token("alice@example.com");
        let as_user = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                Some(&user_token),
                credentials("second", "another-pass"),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(as_user.status(), StatusCode::UNAUTHORIZED);

        let token = app.admin_token("root");
        let as_admin = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                Some(&token),
                credentials("second", "another-pass"),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(as_admin.status(), StatusCode::CREATED);
        assert_eq!(app.storage.admin_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_admin_conflicts() {
        let app = TestApp::new();
        app.seed_admin("root", "s3cret-pass").await;
        let token = app.admin_token("root");

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                Some(&token),
                credentials("root", "other-pass"),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_short_password_rejected() {
        let app = TestApp::new();

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/register",
                None,
                credentials("root", "short"),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.storage.count_admins().await.expect("should count"), 0);
    }

    #[tokio::test]
    async fn test_login_issues_admin_token() {
        let app = TestApp::new();
        app.seed_admin("root", "s3cret-pass").await;

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/login",
                None,
                credentials("root", "s3cret-pass"),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::OK);
        let body: AdminLoginResponse = read_json(response).await;
        let claims = validate_session_token(&body.token, app.config.jwt_secret())
            .expect("token should validate");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.sub, "root");
    }

    #[tokio::test]
    async fn test_login_wrong_password_and_unknown_user_look_alike() {
        let app = TestApp::new();
        app.seed_admin("root", "s3cret-pass").await;

        let wrong = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/login",
                None,
                credentials("root", "wrong-pass"),
            ))
            .await
            .expect("Failed to get response");
        let unknown = app
            .router()
            .oneshot(json_request(
                "POST",
                "/api/v1/admin/login",
                None,
                credentials("nobody", "wrong-pass"),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        let wrong: ErrorResponse = read_json(wrong).await;
        let unknown: ErrorResponse = read_json(unknown).await;
        assert_eq!(wrong.message, unknown.message);
    }

    #[tokio::test]
    async fn test_listings_require_admin() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        app.seed_plan("alice@example.com", false).await;
        let user_token = app.user_token("alice@example.com");

        let as_user = app
            .router()
            .oneshot(json_request(
                "GET",
                "/api/v1/admin/getAllPlans",
                Some(&user_token),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(as_user.status(), StatusCode::UNAUTHORIZED);

        let token = app.admin_token("root");
        let plans = app
            .router()
            .oneshot(json_request(
                "GET",
                "/api/v1/admin/getAllPlans",
                Some(&token),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(plans.status(), StatusCode::OK);
        let plans: Vec<Plan> = read_json(plans).await;
        assert_eq!(plans.len(), 1);

        let users = app
            .router()
            .oneshot(json_request(
                "GET",
                "/api/v1/admin/getAllUsers",
                Some(&token),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");
        let users: Vec<User> = read_json(users).await;
        assert_eq!(users.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_deletes_user_and_plan() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.admin_token("root");

        let user = app
            .router()
            .oneshot(json_request(
                "DELETE",
                "/api/v1/admin/deleteuser/alice@example.com",
                Some(&token),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(user.status(), StatusCode::OK);
        assert_eq!(app.storage.user_count(), 0);

        let plan_uri = format!("/api/v1/admin/deleteplan/{}", plan.plan_id);
        let first = app
            .router()
            .oneshot(json_request("DELETE", &plan_uri, Some(&token), serde_json::Value::Null))
            .await
            .expect("Failed to get response");
        let second = app
            .router()
            .oneshot(json_request("DELETE", &plan_uri, Some(&token), serde_json::Value::Null))
            .await
            .expect("Failed to get response");

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }
}
