pub mod auth;
pub mod subscription;
pub mod types;

pub use types::{SessionId, UserId};
