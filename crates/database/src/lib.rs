pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, DbPool};
pub use repositories::{PostgresSessionRepository, PostgresSubscriptionRepository};

use anyhow::Result;
use std::sync::Arc;

/// Connection pool plus the repositories built on it
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database service from a connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new database service from configuration
    pub async fn from_config(config: &config::DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config).await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn subscription_repository(&self) -> Arc<PostgresSubscriptionRepository> {
        Arc::new(PostgresSubscriptionRepository::new(self.pool.clone()))
    }

    pub fn session_repository(&self) -> Arc<PostgresSessionRepository> {
        Arc::new(PostgresSessionRepository::new(self.pool.clone()))
    }
}
