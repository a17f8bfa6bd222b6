mod common;

use chrono::Duration;
use common::{auth_header, create_test_context, service_now, TestContext};
use serde_json::json;
use services::subscription::ports::{PlanType, SubscriptionStatus};

async fn check(ctx: &TestContext, token: &str, requires_premium: bool) -> serde_json::Value {
    let (name, value) = auth_header(token);
    let response = ctx
        .server
        .post("/v1/entitlements/check")
        .add_header(name, value)
        .json(&json!({ "requires_premium": requires_premium }))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json()
}

#[tokio::test]
async fn test_entitlement_check_requires_auth() {
    let ctx = create_test_context();
    let response = ctx
        .server
        .post("/v1/entitlements/check")
        .json(&json!({ "requires_premium": false }))
        .await;
    assert_eq!(response.status_code(), 401);
}

#[tokio::test]
async fn test_no_subscription_is_denied() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();

    let body = check(&ctx, &token, false).await;

    assert_eq!(body, json!({ "allowed": false }));
    // Checking access never creates a record
    assert_eq!(ctx.repo.get(user_id), None);
}

#[tokio::test]
async fn test_basic_plan_gets_standard_items_only() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();
    ctx.seed_subscription(user_id, PlanType::Basic, SubscriptionStatus::Active, None);

    assert_eq!(check(&ctx, &token, false).await["allowed"], true);
    assert_eq!(check(&ctx, &token, true).await["allowed"], false);
}

#[tokio::test]
async fn test_active_premium_gets_everything() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();
    ctx.seed_subscription(
        user_id,
        PlanType::Premium,
        SubscriptionStatus::Active,
        Some(service_now() + Duration::days(1)),
    );

    let body = check(&ctx, &token, true).await;
    assert_eq!(body["allowed"], true);
    assert_eq!(body["plan"]["plan_type"], "premium");
}

#[tokio::test]
async fn test_expired_premium_is_downgraded_before_deciding() {
    let ctx = create_test_context();
    let (user_id, token) = ctx.login();
    ctx.seed_subscription(
        user_id,
        PlanType::Premium,
        SubscriptionStatus::Active,
        Some(service_now() - Duration::days(1)),
    );

    let body = check(&ctx, &token, true).await;

    assert_eq!(
        body,
        json!({
            "allowed": false,
            "plan": { "plan_type": "basic", "status": "active" }
        })
    );
    assert_eq!(check(&ctx, &token, false).await["allowed"], true);
}

#[tokio::test]
async fn test_free_and_inactive_plans_are_denied() {
    let ctx = create_test_context();

    for (plan_type, status) in [
        (PlanType::Free, SubscriptionStatus::Active),
        (PlanType::Basic, SubscriptionStatus::Inactive),
        (PlanType::Premium, SubscriptionStatus::Cancelled),
    ] {
        let (user_id, token) = ctx.login();
        let expires_at =
            (plan_type == PlanType::Premium).then(|| service_now() + Duration::days(1));
        ctx.seed_subscription(user_id, plan_type, status, expires_at);

        let body = check(&ctx, &token, false).await;
        assert_eq!(body["allowed"], false, "{plan_type}/{status}");
    }
}
