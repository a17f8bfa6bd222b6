pub mod auth;

pub use auth::{auth_middleware, hash_session_token, AuthState, AuthenticatedUser};
