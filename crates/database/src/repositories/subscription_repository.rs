use crate::pool::DbPool;
use async_trait::async_trait;
use services::subscription::ports::{
    PlanType, RepositoryError, Subscription, SubscriptionRepository, SubscriptionStatus,
};
use services::UserId;
use tokio_postgres::Row;

const COLUMNS: &str = "user_id, plan_type, status, gateway_customer_id, gateway_purchase_id,
                       expires_at, version, created_at, updated_at";

pub struct PostgresSubscriptionRepository {
    pool: DbPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, RepositoryError> {
        self.pool.get().await.map_err(db_error)
    }

    async fn insert(&self, subscription: &Subscription) -> Result<Subscription, RepositoryError> {
        let client = self.client().await?;

        // DO NOTHING leaves no row to return when another writer created it first
        let sql = format!(
            "INSERT INTO subscriptions (
                user_id, plan_type, status, gateway_customer_id, gateway_purchase_id,
                expires_at, version, created_at, updated_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8)
             ON CONFLICT (user_id) DO NOTHING
             RETURNING {COLUMNS}"
        );
        let row = client
            .query_opt(
                &sql,
                &[
                    &subscription.user_id,
                    &subscription.plan_type.as_str(),
                    &subscription.status.as_str(),
                    &subscription.gateway_customer_id,
                    &subscription.gateway_purchase_id,
                    &subscription.expires_at,
                    &subscription.created_at,
                    &subscription.updated_at,
                ],
            )
            .await
            .map_err(db_error)?;

        row.as_ref()
            .map(subscription_from_row)
            .unwrap_or(Err(RepositoryError::Conflict))
    }

    async fn update(&self, subscription: &Subscription) -> Result<Subscription, RepositoryError> {
        let client = self.client().await?;

        let sql = format!(
            "UPDATE subscriptions
             SET plan_type = $2,
                 status = $3,
                 gateway_customer_id = $4,
                 gateway_purchase_id = $5,
                 expires_at = $6,
                 updated_at = $7,
                 version = version + 1
             WHERE user_id = $1 AND version = $8
             RETURNING {COLUMNS}"
        );
        let row = client
            .query_opt(
                &sql,
                &[
                    &subscription.user_id,
                    &subscription.plan_type.as_str(),
                    &subscription.status.as_str(),
                    &subscription.gateway_customer_id,
                    &subscription.gateway_purchase_id,
                    &subscription.expires_at,
                    &subscription.updated_at,
                    &subscription.version,
                ],
            )
            .await
            .map_err(db_error)?;

        row.as_ref()
            .map(subscription_from_row)
            .unwrap_or(Err(RepositoryError::Conflict))
    }
}

fn db_error(e: impl Into<anyhow::Error>) -> RepositoryError {
    RepositoryError::Database(e.into())
}

fn subscription_from_row(row: &Row) -> Result<Subscription, RepositoryError> {
    let plan_type: PlanType = row
        .get::<_, String>("plan_type")
        .parse()
        .map_err(db_error)?;
    let status: SubscriptionStatus = row.get::<_, String>("status").parse().map_err(db_error)?;

    Ok(Subscription {
        user_id: row.get("user_id"),
        plan_type,
        status,
        gateway_customer_id: row.get("gateway_customer_id"),
        gateway_purchase_id: row.get("gateway_purchase_id"),
        expires_at: row.get("expires_at"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn get_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        tracing::debug!("Repository: Fetching subscription for user_id={}", user_id);

        let client = self.client().await?;
        let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE user_id = $1");
        let row = client
            .query_opt(&sql, &[&user_id])
            .await
            .map_err(db_error)?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError> {
        tracing::debug!(
            "Repository: Fetching subscription for customer_id={}",
            customer_id
        );

        let client = self.client().await?;
        let sql = format!("SELECT {COLUMNS} FROM subscriptions WHERE gateway_customer_id = $1");
        let row = client
            .query_opt(&sql, &[&customer_id])
            .await
            .map_err(db_error)?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn upsert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, RepositoryError> {
        tracing::info!(
            "Repository: Writing subscription - user_id={}, plan_type={}, status={}, version={}",
            subscription.user_id,
            subscription.plan_type,
            subscription.status,
            subscription.version
        );

        let result = if subscription.version == 0 {
            self.insert(&subscription).await
        } else {
            self.update(&subscription).await
        };

        if matches!(result, Err(RepositoryError::Conflict)) {
            tracing::warn!(
                "Repository: Version conflict writing subscription for user_id={} (expected version={})",
                subscription.user_id,
                subscription.version
            );
        }

        result
    }
}
