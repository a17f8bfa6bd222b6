//! In-memory session store for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::ports::{SessionRepository, UserSession};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, UserSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token_hash: impl Into<String>, session: UserSession) {
        self.sessions
            .lock()
            .expect("lock sessions")
            .insert(token_hash.into(), session);
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<UserSession>> {
        Ok(self
            .sessions
            .lock()
            .expect("lock sessions")
            .get(&token_hash)
            .cloned())
    }
}
