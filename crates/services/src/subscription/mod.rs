pub mod policy;
pub mod ports;
pub mod service;
pub mod stripe_gateway;
pub mod test_helpers;

// Re-export commonly used types
pub use policy::can_access;
pub use ports::{
    AccessDecision, CheckoutGateway, CheckoutStart, Clock, DurationCode, PlanType, PlanView, Subscription,
    SubscriptionError, SubscriptionRepository, SubscriptionService, SubscriptionStatus,
    SystemClock, WebhookVerifier,
};
pub use service::{SubscriptionServiceConfig, SubscriptionServiceImpl};
pub use stripe_gateway::{StripeCheckoutGateway, StripeWebhookVerifier};
