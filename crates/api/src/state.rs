use services::auth::ports::SessionRepository;
use services::subscription::ports::SubscriptionService;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub subscription_service: Arc<dyn SubscriptionService>,
    pub session_repository: Arc<dyn SessionRepository>,
}
