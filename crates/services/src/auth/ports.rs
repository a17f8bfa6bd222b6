use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{SessionId, UserId};

/// Bearer session issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Read side of the session store; sessions are created elsewhere
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Retrieve a session by the SHA-256 hex digest of its token
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<UserSession>>;
}
