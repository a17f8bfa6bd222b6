pub mod entitlements;
pub mod subscriptions;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use http::HeaderValue;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::ToSchema;

use crate::{middleware::AuthState, state::AppState};

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// API version
    pub version: &'static str,
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Plain-http origins on the loopback host, any port
fn is_local_dev_origin(origin: &str) -> bool {
    ["http://localhost", "http://127.0.0.1"].iter().any(|host| {
        origin
            .strip_prefix(host)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}

fn is_origin_allowed(origin: &str, cors_config: &config::CorsConfig) -> bool {
    cors_config.exact_matches.iter().any(|o| o == origin)
        || is_local_dev_origin(origin)
        || (origin.starts_with("https://")
            && cors_config
                .wildcard_suffixes
                .iter()
                .any(|suffix| origin.ends_with(suffix)))
}

/// Create the API router with CORS origins taken from the environment
pub fn create_router(app_state: AppState) -> Router {
    create_router_with_cors(app_state, config::CorsConfig::default())
}

/// Create the main API router with CORS configuration
pub fn create_router_with_cors(app_state: AppState, cors_config: config::CorsConfig) -> Router {
    let auth_state = AuthState {
        session_repository: app_state.session_repository.clone(),
    };

    // Subscription and entitlement routes (requires authentication)
    let authenticated_routes = subscriptions::create_subscriptions_router()
        .merge(entitlements::create_entitlements_router())
        .layer(from_fn_with_state(
            auth_state,
            crate::middleware::auth_middleware,
        ));

    // Checkout return pages and the Stripe webhook (public, no auth required)
    let public_routes = subscriptions::create_public_subscriptions_router();

    let router = Router::new()
        .route("/health", get(health_check))
        .merge(authenticated_routes)
        .merge(public_routes)
        .with_state(app_state);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts: &http::request::Parts| {
                origin
                    .to_str()
                    .is_ok_and(|origin_str| is_origin_allowed(origin_str, &cors_config))
            },
        ))
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    router.layer(cors)
}
