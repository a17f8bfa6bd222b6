//! Runs against the Postgres configured through `DATABASE_*` (or `.env`).

use chrono::{DateTime, Duration, TimeZone, Utc};
use database::{Database, PostgresSubscriptionRepository};
use services::subscription::ports::{
    PlanType, RepositoryError, Subscription, SubscriptionRepository, SubscriptionStatus,
};
use services::UserId;
use tokio::sync::OnceCell;

// Migrations only run once, even when tests run in parallel
static MIGRATIONS_INITIALIZED: OnceCell<()> = OnceCell::const_new();

async fn repository() -> PostgresSubscriptionRepository {
    dotenvy::dotenv().ok();
    let config = config::DatabaseConfig::default();

    let db = Database::from_config(&config)
        .await
        .expect("Failed to connect to database");

    MIGRATIONS_INITIALIZED
        .get_or_init(|| async {
            db.run_migrations()
                .await
                .expect("Failed to run database migrations");
        })
        .await;

    PostgresSubscriptionRepository::new(db.pool().clone())
}

/// Whole seconds, so values survive the microsecond TIMESTAMPTZ round trip
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap()
}

fn customer_id(user_id: UserId) -> String {
    format!("cus_{}", user_id)
}

#[tokio::test]
async fn test_insert_then_read_back() {
    let repo = repository().await;
    let user_id = UserId::new();

    let created = repo
        .upsert_subscription(Subscription::new_free(user_id, t0()))
        .await
        .unwrap();

    assert_eq!(created.version, 1);
    assert_eq!(created.plan_type, PlanType::Free);
    assert_eq!(created.status, SubscriptionStatus::Active);
    assert_eq!(repo.get_by_user_id(user_id).await.unwrap(), Some(created));
}

#[tokio::test]
async fn test_second_insert_conflicts() {
    let repo = repository().await;
    let user_id = UserId::new();

    repo.upsert_subscription(Subscription::new_free(user_id, t0()))
        .await
        .unwrap();
    let err = repo
        .upsert_subscription(Subscription::new_free(user_id, t0()))
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Conflict));
    assert_eq!(repo.get_by_user_id(user_id).await.unwrap().unwrap().version, 1);
}

#[tokio::test]
async fn test_update_bumps_version_and_maps_row() {
    let repo = repository().await;
    let user_id = UserId::new();
    let created = repo
        .upsert_subscription(Subscription::new_free(user_id, t0()))
        .await
        .unwrap();

    let expires_at = t0() + Duration::days(7);
    let updated = repo
        .upsert_subscription(Subscription {
            plan_type: PlanType::Premium,
            gateway_customer_id: Some(customer_id(user_id)),
            gateway_purchase_id: Some(format!("pi_{}", user_id)),
            expires_at: Some(expires_at),
            updated_at: t0() + Duration::minutes(5),
            ..created.clone()
        })
        .await
        .unwrap();

    assert_eq!(updated.version, created.version + 1);
    assert_eq!(updated.plan_type, PlanType::Premium);
    assert_eq!(updated.expires_at, Some(expires_at));
    assert_eq!(updated.created_at, created.created_at);
    assert_eq!(
        repo.get_by_customer_id(&customer_id(user_id)).await.unwrap(),
        Some(updated)
    );
}

#[tokio::test]
async fn test_stale_version_update_conflicts() {
    let repo = repository().await;
    let user_id = UserId::new();
    let created = repo
        .upsert_subscription(Subscription::new_free(user_id, t0()))
        .await
        .unwrap();

    // Another writer moves the row to version 2
    repo.upsert_subscription(Subscription {
        status: SubscriptionStatus::Cancelled,
        ..created.clone()
    })
    .await
    .unwrap();

    let err = repo
        .upsert_subscription(Subscription {
            plan_type: PlanType::Basic,
            ..created
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepositoryError::Conflict));
    let stored = repo.get_by_user_id(user_id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.plan_type, PlanType::Free);
    assert_eq!(stored.status, SubscriptionStatus::Cancelled);
}

#[tokio::test]
async fn test_update_of_missing_row_conflicts() {
    let repo = repository().await;
    let mut sub = Subscription::new_free(UserId::new(), t0());
    sub.version = 3;

    let err = repo.upsert_subscription(sub).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Conflict));
}

#[tokio::test]
async fn test_expiry_on_non_premium_violates_check() {
    let repo = repository().await;
    let mut sub = Subscription::new_free(UserId::new(), t0());
    sub.plan_type = PlanType::Basic;
    sub.expires_at = Some(t0() + Duration::days(1));

    let err = repo.upsert_subscription(sub).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Database(_)));
}

#[tokio::test]
async fn test_customer_id_is_unique_across_users() {
    let repo = repository().await;
    let owner = UserId::new();
    let shared = customer_id(owner);

    let mut first = Subscription::new_free(owner, t0());
    first.gateway_customer_id = Some(shared.clone());
    repo.upsert_subscription(first).await.unwrap();

    let mut second = Subscription::new_free(UserId::new(), t0());
    second.gateway_customer_id = Some(shared.clone());
    let err = repo.upsert_subscription(second).await.unwrap_err();

    assert!(matches!(err, RepositoryError::Database(_)));
    assert_eq!(
        repo.get_by_customer_id(&shared).await.unwrap().unwrap().user_id,
        owner
    );
}

#[tokio::test]
async fn test_unknown_ids_read_as_none() {
    let repo = repository().await;
    assert_eq!(repo.get_by_user_id(UserId::new()).await.unwrap(), None);
    assert_eq!(repo.get_by_customer_id("cus_nobody").await.unwrap(), None);
}
