use crate::config::Config;
use crate::database::Storage;
use crate::email::Mailer;
use crate::state::AppState;
use crate::verification::VerificationWorkflow;
use axum::{
    Router,
    extract::{Extension, Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::{any, get},
};
use opentelemetry::{global, propagation::Extractor};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub mod admins;
pub mod auth;
pub mod config;
pub mod database;
pub mod email;
pub mod error;
pub mod plans;
pub mod state;
pub mod telemetry;
pub mod uploads;
pub mod users;
pub mod verification;

/// Service version reported by `/is-health`: `<crate version>:<commit>`.
pub fn service_version() -> String {
    format!("{}:{}", env!("CARGO_PKG_VERSION"), env!("BUILD_COMMIT"))
}

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Builds the full application router with a randomly generating
/// passcode workflow.
pub fn routes<S, M>(storage: S, mailer: M, config: Config) -> Router
where
    S: Storage,
    M: Mailer,
{
    let verification = VerificationWorkflow::new(storage.clone(), mailer.clone(), config.otp_ttl())
        .with_rate_limit(config.otp_rate_limit());
    let state = AppState::new(storage, mailer, verification);
    router_with_state(state, config)
}

/// Builds the application router around a prepared state.
pub fn router_with_state<S, M>(state: AppState<S, M>, config: Config) -> Router
where
    S: Storage,
    M: Mailer,
{
    let user_api = users::user_routes::<S, M>()
        .merge(verification::verification_routes::<S, M>())
        .merge(uploads::upload_routes::<S, M>(&config));

    let api = Router::new()
        .nest("/user", user_api)
        .nest("/plan", plans::plan_routes::<S, M>())
        .nest("/admin", admins::admin_routes::<S, M>());

    Router::new()
        .route("/is-health", get(health_check::<S, M>))
        .nest("/api/v1", api)
        .nest_service(uploads::IMAGE_URL_PREFIX, ServeDir::new(config.image_dir()))
        .fallback(any(catch_all))
        .layer(cors_layer(&config))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let parent_context = global::get_text_map_propagator(|propagator| {
                    propagator.extract(&HeaderExtractor(request.headers()))
                });

                let span = tracing::info_span!(
                    "http_request",
                    http_request.method = ?request.method(),
                    http_request.uri = ?request.uri(),
                    http_request.version = ?request.version(),
                    http_request.user_agent = ?request.headers().get(header::USER_AGENT),
                );

                span.set_parent(parent_context);

                span
            }),
        )
        .layer(Extension(config))
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = config.cors_allowed_origins();
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
}

async fn health_check<S, M>(
    State(state): State<AppState<S, M>>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse
where
    S: Storage,
    M: Mailer,
{
    let mut response = if state.storage.is_connected().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::BAD_GATEWAY, "502").into_response()
    };

    let headers = [
        ("x-service-env", config.environment().to_string()),
        ("x-service-version", service_version()),
    ];
    for (name, value) in headers {
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(name), value);
            }
            Err(err) => tracing::warn!(header = name, error = %err, "Skipping invalid header"),
        }
    }

    response
}

async fn catch_all() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing to see here")
}
