//! Plan endpoints, mounted under `/api/v1/plan`.
//!
//! Reads of a single plan are open to anyone for public plans and to the
//! author for private ones; a private plan looks missing to everyone else.
//! Writes need the author's user session.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{Plan, PlanUpdate};
use crate::auth::RequireAuth;
use crate::database::Storage;
use crate::email::Mailer;
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TripLocationRequest {
    pub location: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TripLocationResponse {
    pub plan_id: String,
    pub trip_location: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorImgRequest {
    pub author_img: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthorNameRequest {
    pub author_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkUpdateResponse {
    pub author_email: String,
    pub updated: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletePlanResponse {
    pub plan_id: String,
    pub deleted: bool,
}

pub fn plan_routes<S, M>() -> Router<AppState<S, M>>
where
    S: Storage,
    M: Mailer,
{
    Router::new()
        .route("/getpublicplan", get(list_public_plans::<S, M>))
        .route("/getplanbyid/{id}", get(get_plan::<S, M>))
        .route("/gettriplocation/{id}", get(get_trip_location::<S, M>))
        .route("/addtriplocation/{id}", post(add_trip_location::<S, M>))
        .route(
            "/deletetriplocation/{id}",
            delete(delete_trip_location::<S, M>),
        )
        .route("/updateplan/{id}", put(update_plan::<S, M>))
        .route("/updateauthorimg/{email}", put(update_author_img::<S, M>))
        .route("/updateauthorname/{email}", put(update_author_name::<S, M>))
        .route("/deleteplanbyid/{id}", delete(delete_plan::<S, M>))
}

fn plan_not_found(plan_id: &str) -> ApiError {
    ApiError::not_found(format!("plan not found: {plan_id}"))
}

/// Loads a plan the caller may read.
async fn readable_plan<S: Storage>(
    storage: &S,
    plan_id: &str,
    auth: Option<&RequireAuth>,
) -> Result<Plan, ApiError> {
    let plan = storage
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| plan_not_found(plan_id))?;

    let is_author = auth.is_some_and(|a| a.email() == plan.author_email);
    if plan.visibility || is_author {
        Ok(plan)
    } else {
        Err(plan_not_found(plan_id))
    }
}

/// Loads a plan the caller authored.
async fn owned_plan<S: Storage>(
    storage: &S,
    plan_id: &str,
    auth: &RequireAuth,
) -> Result<Plan, ApiError> {
    let plan = storage
        .get_plan(plan_id)
        .await?
        .ok_or_else(|| plan_not_found(plan_id))?;

    if plan.author_email == auth.email() {
        Ok(plan)
    } else if plan.visibility {
        Err(ApiError::forbidden("Only the author can change this plan"))
    } else {
        Err(plan_not_found(plan_id))
    }
}

#[tracing::instrument(skip_all)]
async fn list_public_plans<S, M>(
    State(state): State<AppState<S, M>>,
) -> Result<Json<Vec<Plan>>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let plans = state.storage.list_visible_plans().await?;
    Ok(Json(plans))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn get_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: Option<RequireAuth>,
    Path(id): Path<String>,
) -> Result<Json<Plan>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let plan = readable_plan(&state.storage, &id, auth.as_ref()).await?;
    Ok(Json(plan))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn get_trip_location<S, M>(
    State(state): State<AppState<S, M>>,
    auth: Option<RequireAuth>,
    Path(id): Path<String>,
) -> Result<Json<TripLocationResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    let plan = readable_plan(&state.storage, &id, auth.as_ref()).await?;
    Ok(Json(TripLocationResponse {
        plan_id: plan.plan_id,
        trip_location: plan.trip_location,
    }))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn add_trip_location<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<TripLocationRequest>,
) -> Result<Json<Plan>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    if payload.location.trim().is_empty() {
        return Err(ApiError::validation("location is required"));
    }
    owned_plan(&state.storage, &id, &auth).await?;

    let plan = state
        .storage
        .add_trip_location(&id, &payload.location)
        .await?;
    Ok(Json(plan))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn delete_trip_location<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<TripLocationRequest>,
) -> Result<Json<Plan>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    owned_plan(&state.storage, &id, &auth).await?;

    let plan = state
        .storage
        .delete_trip_location(&id, &payload.location)
        .await?;
    Ok(Json(plan))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn update_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<PlanUpdate>,
) -> Result<Json<Plan>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    if changes.is_empty() {
        return Err(ApiError::validation("No plan fields to update"));
    }
    if changes
        .trip_name
        .as_deref()
        .is_some_and(|name| name.trim().is_empty())
    {
        return Err(ApiError::validation("trip_name cannot be empty"));
    }

    let current = owned_plan(&state.storage, &id, &auth).await?;
    let (start_at, end_at) = changes.merged_dates(&current);
    if end_at < start_at {
        return Err(ApiError::validation("end_at must not be before start_at"));
    }

    let plan = state.storage.update_plan(&id, changes).await?;
    Ok(Json(plan))
}

#[tracing::instrument(skip_all)]
async fn update_author_img<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(email): Path<String>,
    ApiJson(payload): ApiJson<AuthorImgRequest>,
) -> Result<Json<BulkUpdateResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&email)?;

    let updated = state
        .storage
        .update_author_img(auth.email(), &payload.author_img)
        .await?;
    tracing::info!(updated, "Updated author image on plans");

    Ok(Json(BulkUpdateResponse {
        author_email: auth.email().to_owned(),
        updated,
    }))
}

#[tracing::instrument(skip_all)]
async fn update_author_name<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(email): Path<String>,
    ApiJson(payload): ApiJson<AuthorNameRequest>,
) -> Result<Json<BulkUpdateResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    auth.ensure_email(&email)?;

    let updated = state
        .storage
        .update_author_name(auth.email(), &payload.author_name)
        .await?;
    tracing::info!(updated, "Updated author name on plans");

    Ok(Json(BulkUpdateResponse {
        author_email: auth.email().to_owned(),
        updated,
    }))
}

#[tracing::instrument(skip_all, fields(plan_id = %id))]
async fn delete_plan<S, M>(
    State(state): State<AppState<S, M>>,
    auth: RequireAuth,
    Path(id): Path<String>,
) -> Result<Json<DeletePlanResponse>, ApiError>
where
    S: Storage,
    M: Mailer,
{
    owned_plan(&state.storage, &id, &auth).await?;

    if !state.storage.delete_plan(&id).await? {
        return Err(plan_not_found(&id));
    }
    tracing::info!("Deleted plan");

    Ok(Json(DeletePlanResponse {
        plan_id: id,
        deleted: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorResponse;
    use crate::plans::PlanStorage;
    use crate::test_support::{TestApp, json_request, read_json};
    use crate::users::UserStorage;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_public_listing_hides_private_plans() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let public = app.seed_plan("alice@example.com", true).await;
        app.seed_plan("alice@example.com", false).await;

        let response = app
            .router()
            .oneshot(json_request(
                "GET",
                "/api/v1/plan/getpublicplan",
                None,
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::OK);
        let plans: Vec<Plan> = read_json(response).await;
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_id, public.plan_id);
    }

    #[tokio::test]
    async fn test_private_plan_visible_only_to_author() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", false).await;
        let uri = format!("/api/v1/plan/getplanbyid/{}", plan.plan_id);

        let anonymous = app
            .router()
            .oneshot(json_request("GET", &uri, None, serde_json::Value::Null))
            .await
            .expect("Failed to get response");
        assert_eq!(anonymous.status(), StatusCode::NOT_FOUND);

        let other = app.user_token("bob@example.com");
        let stranger = app
            .router()
            .oneshot(json_request("GET", &uri, Some(&other), serde_json::Value::Null))
            .await
            .expect("Failed to get response");
        assert_eq!(stranger.status(), StatusCode::NOT_FOUND);

        let token = app.user_token("alice@example.com");
        let author = app
            .router()
            .oneshot(json_request("GET", &uri, Some(&token), serde_json::Value::Null))
            .await
            .expect("Failed to get response");
        assert_eq!(author.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_plan_with_garbage_token_is_unauthorized() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;

        let response = app
            .router()
            .oneshot(json_request(
                "GET",
                &format!("/api/v1/plan/getplanbyid/{}", plan.plan_id),
                Some("garbage"),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_trip_location_add_then_delete_restores() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("alice@example.com");

        let added = app
            .router()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/plan/addtriplocation/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "location": "place-a" }),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(added.status(), StatusCode::OK);

        let deleted = app
            .router()
            .oneshot(json_request(
                "DELETE",
                &format!("/api/v1/plan/deletetriplocation/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "location": "place-a" }),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(deleted.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(json_request(
                "GET",
                &format!("/api/v1/plan/gettriplocation/{}", plan.plan_id),
                None,
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");
        let body: TripLocationResponse = read_json(response).await;
        assert_eq!(body.trip_location, plan.trip_location);
    }

    #[tokio::test]
    async fn test_delete_absent_trip_location() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("alice@example.com");

        let response = app
            .router()
            .oneshot(json_request(
                "DELETE",
                &format!("/api/v1/plan/deletetriplocation/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "location": "nowhere" }),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_author_cannot_modify_public_plan() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("bob@example.com");

        let response = app
            .router()
            .oneshot(json_request(
                "POST",
                &format!("/api/v1/plan/addtriplocation/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "location": "place-z" }),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: ErrorResponse = read_json(response).await;
        assert_eq!(body.error, "forbidden");
    }

    #[tokio::test]
    async fn test_update_plan_rejects_inverted_dates() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("alice@example.com");
        let too_late = plan.end_at + chrono::Duration::days(1);

        let response = app
            .router()
            .oneshot(json_request(
                "PUT",
                &format!("/api/v1/plan/updateplan/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "start_at": too_late }),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_plan_visibility() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("alice@example.com");

        let response = app
            .router()
            .oneshot(json_request(
                "PUT",
                &format!("/api/v1/plan/updateplan/{}", plan.plan_id),
                Some(&token),
                serde_json::json!({ "visibility": false, "trip_name": "Secret" }),
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::OK);
        let updated: Plan = read_json(response).await;
        assert!(!updated.visibility);
        assert_eq!(updated.trip_name, "Secret");
        assert!(
            app.storage
                .list_visible_plans()
                .await
                .expect("should list")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_bulk_author_name_only_for_self() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        app.seed_plan("alice@example.com", true).await;
        app.seed_plan("alice@example.com", false).await;
        let token = app.user_token("alice@example.com");

        let response = app
            .router()
            .oneshot(json_request(
                "PUT",
                "/api/v1/plan/updateauthorname/alice@example.com",
                Some(&token),
                serde_json::json!({ "author_name": "Alice B." }),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(response.status(), StatusCode::OK);
        let body: BulkUpdateResponse = read_json(response).await;
        assert_eq!(body.updated, 2);

        let forbidden = app
            .router()
            .oneshot(json_request(
                "PUT",
                "/api/v1/plan/updateauthorimg/bob@example.com",
                Some(&token),
                serde_json::json!({ "author_img": "x.png" }),
            ))
            .await
            .expect("Failed to get response");
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_delete_plan_unlinks_from_user() {
        let app = TestApp::new();
        app.seed_user("alice@example.com").await;
        let plan = app.seed_plan("alice@example.com", true).await;
        let token = app.user_token("alice@example.com");

        let response = app
            .router()
            .oneshot(json_request(
                "DELETE",
                &format!("/api/v1/plan/deleteplanbyid/{}", plan.plan_id),
                Some(&token),
                serde_json::Value::Null,
            ))
            .await
            .expect("Failed to get response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(app.storage.plan_count(), 0);
        let user = app
            .storage
            .get_user_by_email("alice@example.com")
            .await
            .expect("should not error")
            .expect("user should exist");
        assert!(user.plan_ids.is_empty());
    }
}
