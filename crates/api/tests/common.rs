#![allow(dead_code)]

use api::{create_router_with_cors, hash_session_token, AppState};
use axum_test::TestServer;
use chrono::{DateTime, Duration, TimeZone, Utc};
use services::auth::ports::UserSession;
use services::auth::test_helpers::InMemorySessionRepository;
use services::subscription::ports::{
    DurationCode, PlanType, Subscription, SubscriptionStatus,
};
use services::subscription::test_helpers::{
    FixedClock, InMemorySubscriptionRepository, MockCheckoutGateway, SharedSecretWebhookVerifier,
};
use services::subscription::{SubscriptionServiceConfig, SubscriptionServiceImpl};
use services::{SessionId, UserId};
use std::sync::Arc;
use uuid::Uuid;

pub const WEBHOOK_SIGNATURE: &str = "t=1700000000,v1=test";

/// Fixed "now" seen by the subscription service
pub fn service_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Test server wired to in-memory ports, with handles to inspect them
pub struct TestContext {
    pub server: TestServer,
    pub repo: Arc<InMemorySubscriptionRepository>,
    pub gateway: Arc<MockCheckoutGateway>,
    pub clock: Arc<FixedClock>,
    pub sessions: Arc<InMemorySessionRepository>,
}

pub fn create_test_context() -> TestContext {
    let repo = Arc::new(InMemorySubscriptionRepository::new());
    let gateway = Arc::new(MockCheckoutGateway::new());
    let clock = Arc::new(FixedClock::new(service_now()));
    let sessions = Arc::new(InMemorySessionRepository::new());

    let prices = DurationCode::ALL
        .into_iter()
        .map(|code| (code, format!("price_test_{}", code)))
        .collect();

    let subscription_service = Arc::new(SubscriptionServiceImpl::new(SubscriptionServiceConfig {
        subscription_repo: repo.clone(),
        checkout_gateway: gateway.clone(),
        webhook_verifier: Arc::new(SharedSecretWebhookVerifier::new(WEBHOOK_SIGNATURE)),
        clock: clock.clone(),
        prices,
    }));

    let app_state = AppState {
        subscription_service,
        session_repository: sessions.clone(),
    };
    let app = create_router_with_cors(app_state, config::CorsConfig::parse("http://localhost:3000"));
    let server = TestServer::new(app).expect("Failed to create test server");

    TestContext {
        server,
        repo,
        gateway,
        clock,
        sessions,
    }
}

impl TestContext {
    /// Register a session for a new user, returning the user and bearer token
    pub fn login(&self) -> (UserId, String) {
        let user_id = UserId::new();
        let token = self.add_session(user_id, Utc::now() + Duration::hours(1));
        (user_id, token)
    }

    /// Register a session for `user_id` expiring at `expires_at`
    pub fn add_session(&self, user_id: UserId, expires_at: DateTime<Utc>) -> String {
        let token = format!("sess_{}", Uuid::new_v4().simple());
        self.sessions.insert(
            hash_session_token(&token),
            UserSession {
                session_id: SessionId::new(),
                user_id,
                created_at: Utc::now() - Duration::days(1),
                expires_at,
            },
        );
        token
    }

    /// Store a subscription for `user_id` with a gateway customer assigned
    pub fn seed_subscription(
        &self,
        user_id: UserId,
        plan_type: PlanType,
        status: SubscriptionStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Subscription {
        let mut subscription = Subscription::new_free(user_id, service_now() - Duration::days(10));
        subscription.plan_type = plan_type;
        subscription.status = status;
        subscription.expires_at = expires_at;
        subscription.gateway_customer_id = Some(format!("cus_seed_{}", user_id.into_uuid().simple()));
        self.repo.insert(subscription)
    }
}

pub fn auth_header(token: &str) -> (http::HeaderName, http::HeaderValue) {
    (
        http::HeaderName::from_static("authorization"),
        http::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}
