use crate::pool::DbPool;
use async_trait::async_trait;
use services::auth::ports::{SessionRepository, UserSession};

pub struct PostgresSessionRepository {
    pool: DbPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<UserSession>> {
        tracing::debug!(
            "Looking up session by token_hash: {}...",
            &token_hash.chars().take(16).collect::<String>()
        );

        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT id, user_id, created_at, expires_at
                 FROM sessions
                 WHERE token_hash = $1",
                &[&token_hash],
            )
            .await?;

        let session = row.map(|r| UserSession {
            session_id: r.get("id"),
            user_id: r.get("user_id"),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
        });

        match &session {
            Some(s) => tracing::debug!(
                "Session found: session_id={}, user_id={}",
                s.session_id,
                s.user_id
            ),
            None => tracing::debug!("No session found for provided token_hash"),
        }

        Ok(session)
    }
}
