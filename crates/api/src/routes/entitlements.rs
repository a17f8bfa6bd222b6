use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};
use axum::{extract::State, routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use services::subscription::ports::{AccessDecision, PlanView};
use utoipa::ToSchema;

/// Access check for one content item
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EntitlementCheckRequest {
    /// Whether the item is restricted to premium plans
    #[serde(default)]
    pub requires_premium: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EntitlementCheckResponse {
    pub allowed: bool,
    /// Effective plan the decision was made on; absent when the user has no subscription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanView>,
}

impl From<AccessDecision> for EntitlementCheckResponse {
    fn from(decision: AccessDecision) -> Self {
        Self {
            allowed: decision.allowed,
            plan: decision.plan,
        }
    }
}

/// Decide whether the current user may open a content item
#[utoipa::path(
    post,
    path = "/v1/entitlements/check",
    tag = "Entitlements",
    request_body = EntitlementCheckRequest,
    responses(
        (status = 200, description = "Access decision", body = EntitlementCheckResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 409, description = "Concurrent modification during expiry reconciliation", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn check_entitlement(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<EntitlementCheckRequest>,
) -> Result<Json<EntitlementCheckResponse>, ApiError> {
    let decision = app_state
        .subscription_service
        .check_access(user.user_id, req.requires_premium)
        .await?;

    Ok(Json(decision.into()))
}

/// Create entitlement router (requires authentication)
pub fn create_entitlements_router() -> Router<AppState> {
    Router::new().route("/v1/entitlements/check", post(check_entitlement))
}
