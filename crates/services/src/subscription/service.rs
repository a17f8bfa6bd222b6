use super::policy;
use super::ports::{
    AccessDecision, CheckoutGateway, CheckoutMetadata, CheckoutStart, Clock, DurationCode, PlanType, PlanView,
    RepositoryError, Subscription, SubscriptionError, SubscriptionRepository, SubscriptionService,
    SubscriptionStatus, WebhookVerifier,
};
use crate::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A read-modify-write is attempted at most this many times before `Conflict`
const MAX_WRITE_ATTEMPTS: usize = 2;

/// Configuration for SubscriptionServiceImpl
pub struct SubscriptionServiceConfig {
    pub subscription_repo: Arc<dyn SubscriptionRepository>,
    pub checkout_gateway: Arc<dyn CheckoutGateway>,
    pub webhook_verifier: Arc<dyn WebhookVerifier>,
    pub clock: Arc<dyn Clock>,
    /// Gateway price code for each purchasable duration
    pub prices: HashMap<DurationCode, String>,
}

pub struct SubscriptionServiceImpl {
    subscription_repo: Arc<dyn SubscriptionRepository>,
    checkout_gateway: Arc<dyn CheckoutGateway>,
    webhook_verifier: Arc<dyn WebhookVerifier>,
    clock: Arc<dyn Clock>,
    prices: HashMap<DurationCode, String>,
}

impl SubscriptionServiceImpl {
    pub fn new(config: SubscriptionServiceConfig) -> Self {
        Self {
            subscription_repo: config.subscription_repo,
            checkout_gateway: config.checkout_gateway,
            webhook_verifier: config.webhook_verifier,
            clock: config.clock,
            prices: config.prices,
        }
    }

    /// Load the user's subscription, creating a free one on first need
    async fn get_or_create_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Subscription, SubscriptionError> {
        if let Some(existing) = self.subscription_repo.get_by_user_id(user_id).await? {
            return Ok(existing);
        }

        let fresh = Subscription::new_free(user_id, self.clock.now());
        match self.subscription_repo.upsert_subscription(fresh).await {
            Ok(created) => {
                tracing::info!("Created free subscription for user_id={}", user_id);
                Ok(created)
            }
            Err(RepositoryError::Conflict) => {
                tracing::debug!(
                    "Subscription for user_id={} created concurrently, reloading",
                    user_id
                );
                self.subscription_repo
                    .get_by_user_id(user_id)
                    .await?
                    .ok_or(SubscriptionError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply `change` to `current` and persist it, retrying once against a
    /// freshly read record if another writer got there first. `change`
    /// returns `None` when the record already needs no write.
    async fn update_with_retry<F>(
        &self,
        mut current: Subscription,
        change: F,
    ) -> Result<Subscription, SubscriptionError>
    where
        F: Fn(&Subscription) -> Option<Subscription> + Send + Sync,
    {
        let user_id = current.user_id;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Some(updated) = change(&current) else {
                return Ok(current);
            };

            match self.subscription_repo.upsert_subscription(updated).await {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::Conflict) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(
                        "Concurrent update of subscription for user_id={} (version={}), retrying",
                        user_id,
                        current.version
                    );
                    current = self
                        .subscription_repo
                        .get_by_user_id(user_id)
                        .await?
                        .ok_or(SubscriptionError::NotFound)?;
                }
                Err(e) => {
                    if matches!(e, RepositoryError::Conflict) {
                        tracing::error!(
                            "Subscription update for user_id={} lost the race twice",
                            user_id
                        );
                    }
                    return Err(e.into());
                }
            }
        }

        Err(SubscriptionError::Conflict)
    }
}

#[async_trait]
impl SubscriptionService for SubscriptionServiceImpl {
    async fn initiate_checkout(
        &self,
        user_id: UserId,
        duration: &str,
    ) -> Result<CheckoutStart, SubscriptionError> {
        tracing::info!(
            "Initiating checkout for user_id={}, duration={}",
            user_id,
            duration
        );

        let duration: DurationCode = duration.parse().map_err(|e| {
            tracing::warn!("Rejected checkout for user_id={}: {}", user_id, e);
            SubscriptionError::InvalidPlan(duration.to_string())
        })?;

        let price_code = self
            .prices
            .get(&duration)
            .cloned()
            .ok_or_else(|| SubscriptionError::NotConfigured(duration.to_string()))?;

        let subscription = self.get_or_create_subscription(user_id).await?;
        let metadata = CheckoutMetadata::new(user_id, duration);

        // No local state is held across the gateway call
        let session = self
            .checkout_gateway
            .create_session(
                subscription.gateway_customer_id.as_deref(),
                &price_code,
                &metadata,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create checkout session");
                SubscriptionError::from(e)
            })?;

        let redirect_url = session.redirect_url.clone().ok_or_else(|| {
            SubscriptionError::GatewayUnavailable("No checkout URL returned".to_string())
        })?;

        if subscription.gateway_customer_id.is_none() {
            let customer_id = session.customer_id.clone();
            let now = self.clock.now();
            let stored = self
                .update_with_retry(subscription, |current| {
                    current.gateway_customer_id.is_none().then(|| Subscription {
                        gateway_customer_id: Some(customer_id.clone()),
                        updated_at: now,
                        ..current.clone()
                    })
                })
                .await?;

            // A parallel first checkout stored its own customer; this session
            // could never be matched back to the user once paid
            if stored.gateway_customer_id.as_deref() != Some(customer_id.as_str()) {
                tracing::warn!(
                    "Subscription for user_id={} already has customer_id={:?}, discarding session {} opened for {}",
                    user_id,
                    stored.gateway_customer_id,
                    session.session_id,
                    customer_id
                );
                return Err(SubscriptionError::Conflict);
            }

            tracing::info!(
                "Assigned gateway customer_id={} to user_id={}",
                customer_id,
                user_id
            );
        }

        tracing::info!(
            "Checkout session created: user_id={}, session_id={}, duration={}",
            user_id,
            session.session_id,
            duration
        );

        Ok(CheckoutStart {
            session_id: session.session_id,
            redirect_url,
        })
    }

    async fn confirm_checkout(&self, session_id: &str) -> Result<Subscription, SubscriptionError> {
        tracing::info!("Confirming checkout session_id={}", session_id);

        let session = self
            .checkout_gateway
            .retrieve_session(session_id)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to retrieve checkout session {}", session_id);
                SubscriptionError::from(e)
            })?;

        let subscription = self
            .subscription_repo
            .get_by_customer_id(&session.customer_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    "No subscription for customer_id={} (session_id={})",
                    session.customer_id,
                    session_id
                );
                SubscriptionError::NotFound
            })?;

        let purchase_id = session.purchase_id.clone().ok_or_else(|| {
            tracing::info!("Checkout session_id={} is not paid yet", session_id);
            SubscriptionError::PaymentIncomplete
        })?;

        let duration: DurationCode = session
            .metadata
            .duration
            .as_deref()
            .ok_or_else(|| {
                SubscriptionError::GatewayUnavailable(format!(
                    "Checkout session {} carries no duration",
                    session_id
                ))
            })?
            .parse()
            .map_err(|e| {
                SubscriptionError::GatewayUnavailable(format!(
                    "Checkout session {}: {}",
                    session_id, e
                ))
            })?;

        if let Some(meta_user) = session.metadata.user_id.as_deref() {
            if meta_user != subscription.user_id.to_string() {
                tracing::warn!(
                    "Checkout session_id={} metadata user_id={} differs from customer owner user_id={}",
                    session_id,
                    meta_user,
                    subscription.user_id
                );
            }
        }

        let now = self.clock.now();
        let expires_at = duration.expiry_from(now).ok_or_else(|| {
            SubscriptionError::InternalError(format!("Expiry overflow for duration {duration}"))
        })?;

        let user_id = subscription.user_id;
        let confirmed = self
            .update_with_retry(subscription, |current| {
                if current.gateway_purchase_id.as_deref() == Some(purchase_id.as_str()) {
                    tracing::info!(
                        "Purchase {} already applied to user_id={}, skipping",
                        purchase_id,
                        current.user_id
                    );
                    return None;
                }
                Some(Subscription {
                    plan_type: PlanType::Premium,
                    status: SubscriptionStatus::Active,
                    gateway_purchase_id: Some(purchase_id.clone()),
                    expires_at: Some(expires_at),
                    updated_at: now,
                    ..current.clone()
                })
            })
            .await?;

        tracing::info!(
            "Checkout confirmed: user_id={}, plan={}, expires_at={:?}",
            user_id,
            confirmed.plan_type,
            confirmed.expires_at
        );

        Ok(confirmed)
    }

    async fn get_effective_plan(&self, user_id: UserId) -> Result<PlanView, SubscriptionError> {
        let subscription = self
            .subscription_repo
            .get_by_user_id(user_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        let now = self.clock.now();
        if !subscription.is_expired_at(now) {
            tracing::debug!(
                "Effective plan for user_id={}: plan={}, status={}",
                user_id,
                subscription.plan_type,
                subscription.status
            );
            return Ok(subscription.view());
        }

        // Expired premium lands on basic, not free
        let reconciled = self
            .update_with_retry(subscription, |current| {
                current.is_expired_at(now).then(|| Subscription {
                    plan_type: PlanType::Basic,
                    status: SubscriptionStatus::Active,
                    expires_at: None,
                    updated_at: now,
                    ..current.clone()
                })
            })
            .await?;

        tracing::info!(
            "Premium expired for user_id={}, now plan={}",
            user_id,
            reconciled.plan_type
        );

        Ok(reconciled.view())
    }

    async fn check_access(
        &self,
        user_id: UserId,
        requires_premium: bool,
    ) -> Result<AccessDecision, SubscriptionError> {
        let plan = match self.get_effective_plan(user_id).await {
            Ok(plan) => Some(plan),
            Err(SubscriptionError::NotFound) => None,
            Err(e) => return Err(e),
        };

        let allowed = policy::can_access(plan.as_ref(), requires_premium);
        tracing::debug!(
            "Access check: user_id={}, plan={:?}, requires_premium={}, allowed={}",
            user_id,
            plan.as_ref().map(|p| p.plan_type),
            requires_premium,
            allowed
        );
        Ok(AccessDecision { allowed, plan })
    }

    async fn cancel(&self, user_id: UserId) -> Result<(), SubscriptionError> {
        tracing::info!("Cancelling subscription for user_id={}", user_id);

        let subscription = self
            .subscription_repo
            .get_by_user_id(user_id)
            .await?
            .ok_or(SubscriptionError::NotFound)?;

        let now = self.clock.now();
        self.update_with_retry(subscription, |current| {
            (current.status != SubscriptionStatus::Cancelled).then(|| Subscription {
                status: SubscriptionStatus::Cancelled,
                updated_at: now,
                ..current.clone()
            })
        })
        .await?;

        tracing::info!("Subscription cancelled for user_id={}", user_id);
        Ok(())
    }

    async fn get_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        Ok(self.subscription_repo.get_by_user_id(user_id).await?)
    }

    async fn handle_gateway_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), SubscriptionError> {
        let event = self.webhook_verifier.verify(payload, signature)?;

        tracing::info!(
            "Processing verified webhook: event_id={}, type={}",
            event.event_id,
            event.event_type
        );

        if !event.confirms_checkout() {
            tracing::debug!("Ignoring webhook type={}", event.event_type);
            return Ok(());
        }

        let session_id = event.session_id.ok_or_else(|| {
            SubscriptionError::WebhookVerificationFailed(format!(
                "Event {} has no checkout session id",
                event.event_id
            ))
        })?;

        match self.confirm_checkout(&session_id).await {
            Ok(_) => Ok(()),
            // Acknowledge so the gateway stops redelivering; nothing here will change on retry
            Err(SubscriptionError::NotFound) => {
                tracing::warn!(
                    "Webhook event_id={} refers to an unknown customer, acknowledged",
                    event.event_id
                );
                Ok(())
            }
            Err(SubscriptionError::PaymentIncomplete) => {
                tracing::info!(
                    "Webhook event_id={} for unpaid session_id={}, awaiting payment",
                    event.event_id,
                    session_id
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
