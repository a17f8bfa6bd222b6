mod common;

use chrono::{DateTime, Duration, Utc};
use common::{auth_header, create_test_context, service_now, WEBHOOK_SIGNATURE};
use serde_json::json;
use services::subscription::ports::{
    CheckoutMetadata, CheckoutSession, DurationCode, PlanType, SubscriptionStatus,
};
use services::UserId;

#[tokio::test]
async fn test_health_check() {
    let ctx = create_test_context();
    let response = ctx.server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_subscription_routes_require_auth() {
    let ctx = create_test_context();

    assert_eq!(ctx.server.get("/v1/subscriptions").await.status_code(), 401);
    assert_eq!(
        ctx.server
            .post("/v1/subscriptions")
            .json(&json!({ "duration": "1_day" }))
            .await
            .status_code(),
        401
    );
    assert_eq!(
        ctx.server.get("/v1/subscriptions/status").await.status_code(),
        401
    );
    assert_eq!(
        ctx.server.post("/v1/subscriptions/cancel").await.status_code(),
        401
    );
    assert_eq!(ctx.gateway.create_calls(), 0);
}

#[tokio::test]
async fn test_malformed_and_unknown_tokens_rejected() {
    let ctx = create_test_context();

    for token in [
        "not-a-session",
        "sess_tooshort",
        "sess_0123456789abcdef0123456789abcdef",
    ] {
        let (name, value) = auth_header(token);
        let response = ctx
            .server
            .get("/v1/subscriptions/status")
            .add_header(name, value)
            .await;
        assert_eq!(response.status_code(), 401, "token {token}");
    }
}

#[tokio::test]
async fn test_expired_session_rejected() {
    let ctx = create_test_context();
    let token = ctx.add_session(UserId::new(), Utc::now() - Duration::minutes(1));

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .get("/v1/subscriptions/status")
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), 401);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "unauthorized");
    assert_eq!(body["message"], "Session has expired");
}

#[tokio::test]
async fn test_purchase_flow_through_success_redirect() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .post("/v1/subscriptions")
        .add_header(name, value)
        .json(&json!({ "duration": "7_days" }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(body["redirect_url"]
        .as_str()
        .unwrap()
        .starts_with("https://checkout.example.com/"));

    // Nothing is granted before payment
    let (name, value) = auth_header(&token);
    let record: serde_json::Value = ctx
        .server
        .get("/v1/subscriptions")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(record["plan_type"], "free");
    assert_eq!(record["status"], "active");
    assert_eq!(record["has_gateway_customer"], true);
    assert_eq!(record["user_id"], user_id.to_string());

    ctx.gateway.complete_session(&session_id);

    let response = ctx
        .server
        .get("/v1/subscriptions/success")
        .add_query_param("session_id", &session_id)
        .await;
    assert_eq!(response.status_code(), 200);
    let plan: serde_json::Value = response.json();
    assert_eq!(plan["plan_type"], "premium");
    assert_eq!(plan["status"], "active");
    let expires_at: DateTime<Utc> = plan["expires_at"].as_str().unwrap().parse().unwrap();
    assert_eq!(expires_at, service_now() + Duration::days(7));

    let (name, value) = auth_header(&token);
    let status: serde_json::Value = ctx
        .server
        .get("/v1/subscriptions/status")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(status, plan);
}

#[tokio::test]
async fn test_invalid_duration_returns_400() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .post("/v1/subscriptions")
        .add_header(name, value)
        .json(&json!({ "duration": "10_years" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "invalid_plan");
    assert_eq!(ctx.gateway.create_calls(), 0);
    assert_eq!(ctx.repo.get(user_id), None);
}

#[tokio::test]
async fn test_gateway_outage_returns_503() {
    let ctx = create_test_context();
    let (_, token) = ctx.login();
    ctx.gateway.set_unavailable(true);

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .post("/v1/subscriptions")
        .add_header(name, value)
        .json(&json!({ "duration": "1_day" }))
        .await;

    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn test_success_redirect_errors() {
    let ctx = create_test_context();
    let (_, token) = ctx.login();

    // Missing session id
    let response = ctx.server.get("/v1/subscriptions/success").await;
    assert_eq!(response.status_code(), 400);

    // Session not yet paid
    let (name, value) = auth_header(&token);
    let start: serde_json::Value = ctx
        .server
        .post("/v1/subscriptions")
        .add_header(name, value)
        .json(&json!({ "duration": "1_day" }))
        .await
        .json();
    let response = ctx
        .server
        .get("/v1/subscriptions/success")
        .add_query_param("session_id", start["session_id"].as_str().unwrap())
        .await;
    assert_eq!(response.status_code(), 402);

    // Paid session for a customer this service never saw
    ctx.gateway.insert_session(CheckoutSession {
        session_id: "cs_foreign".to_string(),
        customer_id: "cus_foreign".to_string(),
        purchase_id: Some("pi_foreign".to_string()),
        redirect_url: None,
        metadata: CheckoutMetadata::new(UserId::new(), DurationCode::OneDay),
    });
    let response = ctx
        .server
        .get("/v1/subscriptions/success")
        .add_query_param("session_id", "cs_foreign")
        .await;
    assert_eq!(response.status_code(), 404);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Subscription not found");
}

#[tokio::test]
async fn test_status_without_subscription_is_404() {
    let ctx = create_test_context();
    let (_, token) = ctx.login();

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .get("/v1/subscriptions/status")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 404);

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .get("/v1/subscriptions")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_status_downgrades_expired_premium() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();
    ctx.seed_subscription(
        user_id,
        PlanType::Premium,
        SubscriptionStatus::Active,
        Some(service_now() - Duration::days(1)),
    );

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .get("/v1/subscriptions/status")
        .add_header(name, value)
        .await;

    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body, json!({ "plan_type": "basic", "status": "active" }));
    assert_eq!(ctx.repo.get(user_id).unwrap().plan_type, PlanType::Basic);
}

#[tokio::test]
async fn test_cancel_subscription() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();
    let expires_at = service_now() + Duration::days(3);
    ctx.seed_subscription(
        user_id,
        PlanType::Premium,
        SubscriptionStatus::Active,
        Some(expires_at),
    );

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .post("/v1/subscriptions/cancel")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 200);

    let stored = ctx.repo.get(user_id).unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);
    assert_eq!(stored.plan_type, PlanType::Premium);
    assert_eq!(stored.expires_at, Some(expires_at));
}

#[tokio::test]
async fn test_cancel_without_subscription_is_404() {
    let ctx = create_test_context();
    let (_, token) = ctx.login();

    let (name, value) = auth_header(&token);
    let response = ctx
        .server
        .post("/v1/subscriptions/cancel")
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_checkout_cancelled_landing_is_public() {
    let ctx = create_test_context();
    let response = ctx.server.get("/v1/subscriptions/cancel").await;
    assert_eq!(response.status_code(), 200);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Payment cancelled");
}

#[tokio::test]
async fn test_webhook_confirms_purchase() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();

    let (name, value) = auth_header(&token);
    let start: serde_json::Value = ctx
        .server
        .post("/v1/subscriptions")
        .add_header(name, value)
        .json(&json!({ "duration": "1_month" }))
        .await
        .json();
    let session_id = start["session_id"].as_str().unwrap();
    ctx.gateway.complete_session(session_id);

    let payload = json!({
        "id": "evt_test_1",
        "type": "checkout.session.completed",
        "data": { "object": { "id": session_id, "object": "checkout.session" } }
    })
    .to_string();

    let response = ctx
        .server
        .post("/v1/subscriptions/stripe/webhook")
        .add_header(
            http::HeaderName::from_static("stripe-signature"),
            http::HeaderValue::from_static(WEBHOOK_SIGNATURE),
        )
        .text(payload)
        .await;

    assert_eq!(response.status_code(), 200);
    let stored = ctx.repo.get(user_id).unwrap();
    assert_eq!(stored.plan_type, PlanType::Premium);
    assert!(stored.gateway_purchase_id.is_some());
}

#[tokio::test]
async fn test_webhook_signature_checks() {
    let ctx = create_test_context();
    let payload = json!({ "id": "evt_x", "type": "checkout.session.completed" }).to_string();

    let response = ctx
        .server
        .post("/v1/subscriptions/stripe/webhook")
        .text(payload.clone())
        .await;
    assert_eq!(response.status_code(), 400);

    let response = ctx
        .server
        .post("/v1/subscriptions/stripe/webhook")
        .add_header(
            http::HeaderName::from_static("stripe-signature"),
            http::HeaderValue::from_static("t=1,v1=forged"),
        )
        .text(payload)
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(ctx.gateway.retrieve_calls(), 0);
}
