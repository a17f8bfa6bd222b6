pub mod session_repository;
pub mod subscription_repository;

pub use session_repository::PostgresSessionRepository;
pub use subscription_repository::PostgresSubscriptionRepository;
