//! In-memory implementations of the subscription ports for tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::ports::{
    CheckoutGateway, CheckoutMetadata, CheckoutSession, Clock, GatewayError, GatewayEvent,
    RepositoryError, Subscription, SubscriptionError, SubscriptionRepository, WebhookVerifier,
};
use super::stripe_gateway::parse_gateway_event;
use crate::UserId;

type ConcurrentWrite = Box<dyn FnOnce(&mut Subscription) + Send>;

/// Subscription store with the same optimistic-concurrency rules as Postgres
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    records: Mutex<HashMap<UserId, Subscription>>,
    writes: AtomicUsize,
    concurrent_writes: Mutex<Vec<ConcurrentWrite>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing version checks
    pub fn insert(&self, mut subscription: Subscription) -> Subscription {
        if subscription.version == 0 {
            subscription.version = 1;
        }
        self.records
            .lock()
            .expect("lock records")
            .insert(subscription.user_id, subscription.clone());
        subscription
    }

    pub fn get(&self, user_id: UserId) -> Option<Subscription> {
        self.records
            .lock()
            .expect("lock records")
            .get(&user_id)
            .cloned()
    }

    /// Number of successful writes through `upsert_subscription`
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate another writer landing between the caller's read and write.
    /// Each queued change is applied to the stored record (bumping its version)
    /// just before one subsequent `upsert_subscription` is evaluated.
    pub fn queue_concurrent_write(&self, change: impl FnOnce(&mut Subscription) + Send + 'static) {
        self.concurrent_writes
            .lock()
            .expect("lock concurrent writes")
            .push(Box::new(change));
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn get_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, RepositoryError> {
        Ok(self.get(user_id))
    }

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError> {
        let records = self.records.lock().expect("lock records");
        Ok(records
            .values()
            .find(|sub| sub.gateway_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn upsert_subscription(
        &self,
        mut subscription: Subscription,
    ) -> Result<Subscription, RepositoryError> {
        let mut records = self.records.lock().expect("lock records");

        let concurrent = {
            let mut queue = self.concurrent_writes.lock().expect("lock concurrent writes");
            (!queue.is_empty()).then(|| queue.remove(0))
        };
        if let Some(change) = concurrent {
            if let Some(stored) = records.get_mut(&subscription.user_id) {
                change(stored);
                stored.version += 1;
            }
        }

        // Stored versions start at 1, so version 0 only matches a missing row
        let stored_version = records
            .get(&subscription.user_id)
            .map(|stored| stored.version)
            .unwrap_or(0);
        if stored_version != subscription.version {
            return Err(RepositoryError::Conflict);
        }

        if let Some(customer_id) = subscription.gateway_customer_id.as_deref() {
            let taken = records.values().any(|other| {
                other.user_id != subscription.user_id
                    && other.gateway_customer_id.as_deref() == Some(customer_id)
            });
            if taken {
                return Err(RepositoryError::Database(anyhow::anyhow!(
                    "duplicate gateway_customer_id {customer_id}"
                )));
            }
        }

        subscription.version += 1;
        records.insert(subscription.user_id, subscription.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(subscription)
    }
}

/// Record of one `create_session` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub customer_id: Option<String>,
    pub price_code: String,
    pub metadata: CheckoutMetadata,
}

/// Checkout gateway that keeps sessions in memory
#[derive(Default)]
pub struct MockCheckoutGateway {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    created: Mutex<Vec<CreatedSession>>,
    counter: AtomicUsize,
    retrieve_calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MockCheckoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the gateway were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn created_sessions(&self) -> Vec<CreatedSession> {
        self.created.lock().expect("lock created").clone()
    }

    pub fn create_calls(&self) -> usize {
        self.created.lock().expect("lock created").len()
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    /// Mark a session as paid, as the user finishing checkout would.
    /// Returns the purchase id now reported on the session.
    pub fn complete_session(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().expect("lock sessions");
        let session = sessions.get_mut(session_id)?;
        let purchase_id = format!("pi_{}", session_id.trim_start_matches("cs_"));
        session.purchase_id = Some(purchase_id.clone());
        Some(purchase_id)
    }

    /// Register an arbitrary session (e.g. one for a customer this system never saw)
    pub fn insert_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .expect("lock sessions")
            .insert(session.session_id.clone(), session);
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Request("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckoutGateway for MockCheckoutGateway {
    async fn create_session(
        &self,
        customer_id: Option<&str>,
        price_code: &str,
        metadata: &CheckoutMetadata,
    ) -> Result<CheckoutSession, GatewayError> {
        self.check_available()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        self.created
            .lock()
            .expect("lock created")
            .push(CreatedSession {
                customer_id: customer_id.map(str::to_string),
                price_code: price_code.to_string(),
                metadata: metadata.clone(),
            });

        let session_id = format!("cs_test_{n}");
        let session = CheckoutSession {
            session_id: session_id.clone(),
            customer_id: customer_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("cus_test_{n}")),
            purchase_id: None,
            redirect_url: Some(format!("https://checkout.example.com/pay/{session_id}")),
            metadata: metadata.clone(),
        };
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError> {
        self.check_available()?;
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .expect("lock sessions")
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::Request(format!("No such checkout session: {session_id}")))
    }
}

/// Clock pinned to a settable instant
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("lock clock") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("lock clock");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("lock clock")
    }
}

/// Webhook verifier that accepts exactly one signature value
pub struct SharedSecretWebhookVerifier {
    signature: String,
}

impl SharedSecretWebhookVerifier {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

impl WebhookVerifier for SharedSecretWebhookVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, SubscriptionError> {
        if signature != self.signature {
            return Err(SubscriptionError::WebhookVerificationFailed(
                "signature mismatch".to_string(),
            ));
        }
        parse_gateway_event(payload)
    }
}
