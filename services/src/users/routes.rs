//! User endpoints, mounted under `/api/v1/user`.
//!
//! Every route needs a user session token from `/user/verifyotp`. Routes
//! that take an `{email}` path segment only act on the caller's own account.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{NewUser, User, UserUpdate};
use crate::auth::RequireAuth;
use crate::database::Storage;
use crate::email::{Mailer, templates};
use crate::error::{ApiError, ApiJson};
use crate::plans::{NewPlan, Plan};
use crate::state::AppState;

/// Request body for `POST /register`. The email must match the session.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(default)]
    pub tel: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub image: String,
}

/// Request body for `PUT /update/{email}`. Absent fields are left alone;
/// `"date_of_birth": null` clears the date.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub tel: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    pub gender: Option<String>,
    pub image: Option<String>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl From<UpdateUserRequest> for UserUpdate {
    fn from(req: UpdateUserRequest) -> Self {
        Self {
            username: req.username,
            firstname: req.firstname,
            lastname: req.lastname,
            tel: req.tel,
            date_of_birth: req.date_of_birth,
            gender: req.gender,
            image: req.image,
        }
    }
}

/// Request body for `POST /createplan`.
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub trip_name: String,
    #[serde(default)]
    pub region_label: String,
    #[serde(default)]
    pub province_label: String,
    #[serde(default)]
    pub province_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub trip_location: Vec<String>,
    /// Required; plans are never public by accident.
    pub visibility: bool,
    /// Defaults to the author's username.
    pub author_name: Option<String>,
    /// Defaults to the author's profile image.
    pub author_img: Option<String>,
}

/// Request body for linking or unlinking a plan.
#[derive(Debug, Deserialize)]
pub struct UserPlanRequest {
    pub plan_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteUserPlanResponse {
    pub plan_id: String,
    pub user: User,
}

pub fn user_routes<S, M>() -> Router<AppState<S, M>>
where
    S: Storage,
    M: Mailer,
{
    Router::new()
        .route("/register", post(register::<S, M>))
        .route("/getuser/{email}", get(get_user::<S, M>))
        .route("/update/{email}", put(update_user::<S, M>))
        .route("/createplan", post(create_plan::<S, M>))
        .route("/updateuserplan/{email}", put(link_plan::<S, M>))
        .route(
            "/deleteuserplanbyemail/{email}",
            delete(unlink_plan::<S, M>),
        )
}

#[tracing::instrument(skip_all)]
async fn register<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&payload.email)?;

    let user = state
        .storage
        .create_user(NewUser {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: auth.email().to_owned(),
            username: payload.username,
            firstname: payload.firstname,
            lastname: payload.lastname,
            tel: payload.tel,
            date_of_birth: payload.date_of_birth,
            gender: payload.gender,
            image: payload.image,
        })
        .await?;

    tracing::info!(user_id = %user.user_id, "Registered user");

    if let Err(err) = state
        .mailer
        .send(templates::welcome_email(&user.email, &user.username))
        .await
    {
        tracing::warn!(error = %err, "Failed to send welcome email");
    }

    Ok((StatusCode::CREATED, Json(user)))
}

#[tracing::instrument(skip_all)]
async fn get_user<S, M>(
    State(state): State<AppState<S, M>>,
    _auth: RequireAuth,
    Path(email): Path<String>,
) -> Result<Json<User>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    state
        .storage
        .get_user_by_email(&email)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("user not found: {email}")))
}

#[tracing::instrument(skip_all)]
async fn update_user<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(email): Path<String>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> Result<Json<User>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&email)?;

    let changes = UserUpdate::from(payload);
    if changes.is_empty() {
        return Err(ApiError::validation("No profile fields to update"));
    }

    let user = state.storage.update_user(auth.email(), changes).await?;
    Ok(Json(user))
}

#[tracing::instrument(skip_all)]
async fn create_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    ApiJson(payload): ApiJson<CreatePlanRequest>,
) -> Result<(StatusCode, Json<Plan>), ApiError>
where
    S: Storage,
    M: Mailer,
{
    if payload.trip_name.trim().is_empty() {
        return Err(ApiError::validation("trip_name is required"));
    }
    if payload.end_at < payload.start_at {
        return Err(ApiError::validation("end_at must not be before start_at"));
    }

    let author = state
        .storage
        .get_user_by_email(auth.email())
        .await?
        .ok_or_else(|| ApiError::not_found("Register before creating plans"))?;

    let plan = state
        .storage
        .create_plan(NewPlan {
            plan_id: uuid::Uuid::new_v4().to_string(),
            author_email: author.email.clone(),
            author_name: payload.author_name.unwrap_or(author.username),
            author_img: payload.author_img.unwrap_or(author.image),
            trip_name: payload.trip_name,
            region_label: payload.region_label,
            province_label: payload.province_label,
            province_id: payload.province_id,
            start_at: payload.start_at,
            end_at: payload.end_at,
            trip_location: payload.trip_location,
            visibility: payload.visibility,
        })
        .await?;

    if let Err(err) = state
        .storage
        .add_plan_to_user(&author.email, &plan.plan_id)
        .await
    {
        tracing::error!(
            error = %err,
            plan_id = %plan.plan_id,
            "Failed to link new plan, rolling back"
        );
        if let Err(cleanup) = state.storage.delete_plan(&plan.plan_id).await {
            tracing::error!(error = %cleanup, "Failed to remove unlinked plan");
        }
        return Err(err.into());
    }

    tracing::info!(plan_id = %plan.plan_id, "Created plan");
    Ok((StatusCode::CREATED, Json(plan)))
}

#[tracing::instrument(skip_all, fields(plan_id = %payload.plan_id))]
async fn link_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(email): Path<String>,
    ApiJson(payload): ApiJson<UserPlanRequest>,
) -> Result<Json<User>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&email)?;

    // Private plans of other authors are indistinguishable from missing ones.
    let plan = state.storage.get_plan(&payload.plan_id).await?;
    match plan {
        Some(plan) if plan.visibility || plan.author_email == auth.email() => {}
        _ => {
            return Err(ApiError::not_found(format!(
                "plan not found: {}",
                payload.plan_id
            )));
        }
    }

    let user = state
        .storage
        .add_plan_to_user(auth.email(), &payload.plan_id)
        .await?;
    Ok(Json(user))
}

#[tracing::instrument(skip_all, fields(plan_id = %payload.plan_id))]
async fn unlink_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(email): Path<String>,
    ApiJson(payload): ApiJson<UserPlanRequest>,
) -> Result<Json<DeleteUserPlanResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&email)?;

    let user = state
        .storage
        .remove_plan_from_user(auth.email(), &payload.plan_id)
        .await?;
    Ok(Json(DeleteUserPlanResponse {
        plan_id: payload.plan_id,
        user,
    }))
}
