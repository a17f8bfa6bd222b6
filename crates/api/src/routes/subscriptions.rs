use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use services::subscription::ports::{PlanType, PlanView, Subscription, SubscriptionStatus};
use services::UserId;
use url::Url;
use utoipa::ToSchema;

/// Check that a checkout return URL is https, or http on localhost/127.0.0.1 for development
pub fn validate_redirect_url(url_str: &str, field_name: &str) -> anyhow::Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| anyhow::anyhow!("Invalid {field_name} '{url_str}': {e}"))?;

    let local = matches!(url.host_str(), Some("localhost" | "127.0.0.1"));
    match url.scheme() {
        "https" => Ok(()),
        "http" if local => Ok(()),
        "http" => Err(anyhow::anyhow!(
            "Invalid {field_name}: http is only allowed for localhost/127.0.0.1"
        )),
        other => Err(anyhow::anyhow!(
            "Invalid {field_name}: unsupported scheme '{other}'"
        )),
    }
}

/// Request to start a purchase
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionRequest {
    /// Duration code: "1_day", "7_days" or "1_month"
    pub duration: String,
}

/// Checkout session to send the user to
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateSubscriptionResponse {
    /// Gateway checkout session id
    pub session_id: String,
    /// Hosted checkout page URL
    pub redirect_url: String,
}

/// Query parameters the gateway appends on the success redirect
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct CheckoutSuccessParams {
    /// Checkout session id
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Stored subscription record
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub user_id: UserId,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether a payment-gateway customer has been assigned
    pub has_gateway_customer: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            user_id: sub.user_id,
            plan_type: sub.plan_type,
            status: sub.status,
            expires_at: sub.expires_at,
            has_gateway_customer: sub.gateway_customer_id.is_some(),
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

/// Start a purchase
///
/// Opens a hosted checkout session for the requested duration. The plan only
/// changes once the payment is confirmed.
#[utoipa::path(
    post,
    path = "/v1/subscriptions",
    tag = "Subscriptions",
    request_body = CreateSubscriptionRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CreateSubscriptionResponse),
        (status = 400, description = "Unknown duration code", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::error::ApiErrorResponse),
        (status = 503, description = "Payment gateway unavailable or not configured", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn create_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<Json<CreateSubscriptionResponse>, ApiError> {
    tracing::info!(
        "Creating checkout for user_id={}, duration={}",
        user.user_id,
        req.duration
    );

    let start = app_state
        .subscription_service
        .initiate_checkout(user.user_id, &req.duration)
        .await?;

    Ok(Json(CreateSubscriptionResponse {
        session_id: start.session_id,
        redirect_url: start.redirect_url,
    }))
}

/// Checkout success return
///
/// The gateway redirects here with the checkout session id after payment.
#[utoipa::path(
    get,
    path = "/v1/subscriptions/success",
    tag = "Subscriptions",
    params(CheckoutSuccessParams),
    responses(
        (status = 200, description = "Purchase applied", body = PlanView),
        (status = 400, description = "Missing session id", body = crate::error::ApiErrorResponse),
        (status = 402, description = "Payment not completed", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ApiErrorResponse),
        (status = 503, description = "Payment gateway unavailable", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn checkout_success(
    State(app_state): State<AppState>,
    Query(params): Query<CheckoutSuccessParams>,
) -> Result<Json<PlanView>, ApiError> {
    let session_id = params
        .session_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing session_id"))?;

    let subscription = app_state
        .subscription_service
        .confirm_checkout(&session_id)
        .await?;

    Ok(Json(subscription.view()))
}

/// Checkout abandoned return
#[utoipa::path(
    get,
    path = "/v1/subscriptions/cancel",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Payment cancelled", body = MessageResponse)
    )
)]
pub async fn checkout_cancelled() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Payment cancelled".to_string(),
    })
}

/// Current plan after expiry reconciliation
#[utoipa::path(
    get,
    path = "/v1/subscriptions/status",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Effective plan", body = PlanView),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn get_subscription_status(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<PlanView>, ApiError> {
    let plan = app_state
        .subscription_service
        .get_effective_plan(user.user_id)
        .await?;
    Ok(Json(plan))
}

/// Stored subscription record, without reconciliation
#[utoipa::path(
    get,
    path = "/v1/subscriptions",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Subscription record", body = SubscriptionResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn get_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let subscription = app_state
        .subscription_service
        .get_subscription(user.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Subscription not found"))?;
    Ok(Json(subscription.into()))
}

/// Cancel the subscription
///
/// Marks it cancelled; the plan and expiry are kept as they were.
#[utoipa::path(
    post,
    path = "/v1/subscriptions/cancel",
    tag = "Subscriptions",
    responses(
        (status = 200, description = "Subscription cancelled", body = MessageResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Subscription not found", body = crate::error::ApiErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn cancel_subscription(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MessageResponse>, ApiError> {
    app_state.subscription_service.cancel(user.user_id).await?;
    Ok(Json(MessageResponse {
        message: "Subscription cancelled".to_string(),
    }))
}

/// Handle Stripe webhook events (public endpoint - no auth required)
#[utoipa::path(
    post,
    path = "/v1/subscriptions/stripe/webhook",
    tag = "Subscriptions",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event received"),
        (status = 400, description = "Missing or invalid signature", body = crate::error::ApiErrorResponse),
        (status = 503, description = "Payment gateway unavailable", body = crate::error::ApiErrorResponse)
    )
)]
pub async fn handle_stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::info!("Received Stripe webhook");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing Stripe-Signature header"))?;

    app_state
        .subscription_service
        .handle_gateway_webhook(&body, signature)
        .await?;

    Ok(Json(serde_json::json!({ "received": true })))
}

/// Create subscription router (requires authentication)
pub fn create_subscriptions_router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/subscriptions",
            post(create_subscription).get(get_subscription),
        )
        .route("/v1/subscriptions/status", get(get_subscription_status))
        .route("/v1/subscriptions/cancel", post(cancel_subscription))
}

/// Create public subscription router (checkout returns and webhooks - no auth)
pub fn create_public_subscriptions_router() -> Router<AppState> {
    Router::new()
        .route("/v1/subscriptions/success", get(checkout_success))
        .route("/v1/subscriptions/cancel", get(checkout_cancelled))
        .route(
            "/v1/subscriptions/stripe/webhook",
            post(handle_stripe_webhook),
        )
}
