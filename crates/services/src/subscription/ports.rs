use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::UserId;

/// Metadata key carrying the purchasing user's id on a checkout session
pub const METADATA_USER_ID: &str = "user_id";
/// Metadata key carrying the requested duration code on a checkout session
pub const METADATA_DURATION: &str = "duration";

/// Returned when a stored or requested enum value is not one of the known variants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Tier of content access a subscription grants
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Free,
    Basic,
    Premium,
}

impl PlanType {
    pub const ALL: [PlanType; 3] = [PlanType::Free, PlanType::Basic, PlanType::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            other => Err(UnknownVariant {
                kind: "plan type",
                value: other.to_string(),
            }),
        }
    }
}

/// Administrative state of a subscription, independent of its tier
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 3] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Inactive,
        SubscriptionStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

/// Supported purchase durations for a premium grant
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationCode {
    #[serde(rename = "1_day")]
    OneDay,
    #[serde(rename = "7_days")]
    SevenDays,
    #[serde(rename = "1_month")]
    OneMonth,
}

impl DurationCode {
    pub const ALL: [DurationCode; 3] = [
        DurationCode::OneDay,
        DurationCode::SevenDays,
        DurationCode::OneMonth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneDay => "1_day",
            Self::SevenDays => "7_days",
            Self::OneMonth => "1_month",
        }
    }

    /// End of a grant of this duration starting at `start`.
    ///
    /// Months are calendar months (Jan 31 + 1 month = last day of February).
    /// Returns `None` only if the result is out of chrono's representable range.
    pub fn expiry_from(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::OneDay => start.checked_add_signed(Duration::days(1)),
            Self::SevenDays => start.checked_add_signed(Duration::days(7)),
            Self::OneMonth => start.checked_add_months(Months::new(1)),
        }
    }
}

impl fmt::Display for DurationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationCode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "duration code",
                value: s.to_string(),
            })
    }
}

/// Subscription record, one per user.
///
/// `expires_at` is only ever set while `plan_type` is premium. `version` is the
/// optimistic-concurrency token: 0 for a record that has never been stored,
/// bumped by the store on every successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub gateway_customer_id: Option<String>,
    pub gateway_purchase_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Fresh, unsaved record for a user who has never needed one
    pub fn new_free(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan_type: PlanType::Free,
            status: SubscriptionStatus::Active,
            gateway_customer_id: None,
            gateway_purchase_id: None,
            expires_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A premium grant whose expiry is at or before `now` has run out
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.plan_type == PlanType::Premium && self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn view(&self) -> PlanView {
        PlanView {
            plan_type: self.plan_type,
            status: self.status,
            expires_at: self.expires_at,
        }
    }
}

/// Reconciled projection of a subscription used for entitlement decisions
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanView {
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Caller-supplied metadata the gateway echoes back unmodified
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub user_id: Option<String>,
    pub duration: Option<String>,
}

impl CheckoutMetadata {
    pub fn new(user_id: UserId, duration: DurationCode) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            duration: Some(duration.as_str().to_string()),
        }
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(user_id) = &self.user_id {
            map.insert(METADATA_USER_ID.to_string(), user_id.clone());
        }
        if let Some(duration) = &self.duration {
            map.insert(METADATA_DURATION.to_string(), duration.clone());
        }
        map
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self {
            user_id: map.get(METADATA_USER_ID).cloned(),
            duration: map.get(METADATA_DURATION).cloned(),
        }
    }
}

/// Gateway-issued checkout session (read-only to this crate)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    /// Gateway customer the session was opened for
    pub customer_id: String,
    /// Completed purchase; `None` until payment has gone through
    pub purchase_id: Option<String>,
    pub redirect_url: Option<String>,
    pub metadata: CheckoutMetadata,
}

/// Result of starting a purchase
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutStart {
    pub session_id: String,
    pub redirect_url: String,
}

/// Verified push notification from the payment gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    /// Checkout session the event refers to, when it refers to one
    pub session_id: Option<String>,
}

impl GatewayEvent {
    pub const CHECKOUT_COMPLETED: &'static str = "checkout.session.completed";
    /// Sent later for delayed payment methods once the funds have cleared
    pub const CHECKOUT_ASYNC_PAYMENT_SUCCEEDED: &'static str =
        "checkout.session.async_payment_succeeded";

    /// Whether this event may carry a newly paid checkout session
    pub fn confirms_checkout(&self) -> bool {
        self.event_type == Self::CHECKOUT_COMPLETED
            || self.event_type == Self::CHECKOUT_ASYNC_PAYMENT_SUCCEEDED
    }
}

/// Outcome of an entitlement check
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Effective plan the decision was made on; absent when the user has no subscription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanView>,
}

/// Error types for subscription operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// Unknown or unsupported duration code
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    /// No subscription for the user, or no subscription for the session's customer
    #[error("Subscription not found")]
    NotFound,
    /// Payment gateway did not respond or returned malformed data
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    /// Subscription changed concurrently and the single retry also lost
    #[error("Subscription was modified concurrently")]
    Conflict,
    /// Checkout session has no completed payment
    #[error("Checkout session has not been paid")]
    PaymentIncomplete,
    /// No gateway price configured for the requested duration
    #[error("Checkout is not configured for plan: {0}")]
    NotConfigured(String),
    /// Webhook signature or payload rejected
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Errors surfaced by subscription stores
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Stored version differs from the one the write was based on
    #[error("optimistic concurrency conflict")]
    Conflict,
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<RepositoryError> for SubscriptionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict => Self::Conflict,
            RepositoryError::Database(e) => Self::DatabaseError(e.to_string()),
        }
    }
}

/// Errors surfaced by checkout gateways
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Request(String),
    #[error("malformed gateway response: {0}")]
    Malformed(String),
}

impl From<GatewayError> for SubscriptionError {
    fn from(err: GatewayError) -> Self {
        Self::GatewayUnavailable(err.to_string())
    }
}

/// Persistence for subscription records
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn get_by_user_id(&self, user_id: UserId)
        -> Result<Option<Subscription>, RepositoryError>;

    async fn get_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<Subscription>, RepositoryError>;

    /// Insert (version 0) or update (version matches stored) a subscription.
    /// Returns the stored record with its new version, or `Conflict`.
    async fn upsert_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, RepositoryError>;
}

/// External payment gateway, limited to checkout sessions
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Open a single-item checkout for `price_code`. When `customer_id` is
    /// `None` the gateway creates a customer; the returned session always
    /// carries the customer id it was opened for.
    async fn create_session(
        &self,
        customer_id: Option<&str>,
        price_code: &str,
        metadata: &CheckoutMetadata,
    ) -> Result<CheckoutSession, GatewayError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, GatewayError>;
}

/// Verifies and decodes gateway push notifications
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent, SubscriptionError>;
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Subscription lifecycle and entitlement decisions
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// Start a purchase: validates the duration, ensures a subscription record
    /// exists and opens a gateway checkout session. Never changes the plan.
    async fn initiate_checkout(
        &self,
        user_id: UserId,
        duration: &str,
    ) -> Result<CheckoutStart, SubscriptionError>;

    /// Apply a completed checkout session to the subscription of its customer
    async fn confirm_checkout(&self, session_id: &str) -> Result<Subscription, SubscriptionError>;

    /// Current plan after lazy expiry reconciliation
    async fn get_effective_plan(&self, user_id: UserId) -> Result<PlanView, SubscriptionError>;

    /// Reconcile, then decide whether the user may open a content item
    async fn check_access(
        &self,
        user_id: UserId,
        requires_premium: bool,
    ) -> Result<AccessDecision, SubscriptionError>;

    /// Mark the subscription cancelled; plan and expiry are left alone
    async fn cancel(&self, user_id: UserId) -> Result<(), SubscriptionError>;

    /// Stored record as-is, without reconciliation
    async fn get_subscription(
        &self,
        user_id: UserId,
    ) -> Result<Option<Subscription>, SubscriptionError>;

    /// Handle a push notification from the payment gateway
    async fn handle_gateway_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), SubscriptionError>;
}
