use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use services::{auth::ports::SessionRepository, SessionId, UserId};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::ApiError;

const TOKEN_PREFIX: &str = "sess_";
/// `sess_` followed by 32 hex characters
const TOKEN_LEN: usize = 37;

/// Authenticated user information inserted into request extensions by the auth middleware.
/// Extract in route handlers using `Extension<AuthenticatedUser>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub session_id: SessionId,
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_repository: Arc<dyn SessionRepository>,
}

/// Hash a session token for lookup
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract and validate the bearer token from the Authorization header
fn extract_token_from_request(request: &Request) -> Result<&str, ApiError> {
    let auth_value = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("No authorization header found");
            ApiError::missing_auth_header()
        })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Authorization header does not start with 'Bearer '");
        ApiError::invalid_auth_header()
    })?;

    if !token.starts_with(TOKEN_PREFIX) || token.len() != TOKEN_LEN {
        tracing::warn!(
            "Invalid session token format: length {}, prefix ok: {}",
            token.len(),
            token.starts_with(TOKEN_PREFIX)
        );
        return Err(ApiError::invalid_token());
    }

    Ok(token)
}

/// Authenticate a session by token hash
async fn authenticate_session_by_token(
    state: &AuthState,
    token_hash: String,
) -> Result<AuthenticatedUser, ApiError> {
    let hash_prefix = token_hash.chars().take(16).collect::<String>();

    let session = state
        .session_repository
        .get_session_by_token_hash(token_hash)
        .await
        .map_err(|e| {
            tracing::error!(
                "Failed to get session from repository for token_hash {}...: {}",
                hash_prefix,
                e
            );
            ApiError::internal_server_error("Failed to authenticate session")
        })?
        .ok_or_else(|| {
            tracing::warn!("Session not found for token_hash: {}...", hash_prefix);
            ApiError::session_not_found()
        })?;

    let now = Utc::now();
    if session.is_expired_at(now) {
        tracing::warn!(
            "Session expired: session_id={}, expired {} seconds ago",
            session.session_id,
            now.signed_duration_since(session.expires_at).num_seconds()
        );
        return Err(ApiError::session_expired());
    }

    Ok(AuthenticatedUser {
        user_id: session.user_id,
        session_id: session.session_id,
    })
}

/// Authentication middleware that validates session tokens
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token_hash = extract_token_from_request(&request)
        .map(hash_session_token)
        .map_err(|e| e.into_response())?;

    let user = authenticate_session_by_token(&state, token_hash)
        .await
        .map_err(|e| e.into_response())?;

    tracing::debug!(
        "Authenticated user_id={}, session_id={} for {} {}",
        user.user_id,
        user.session_id,
        request.method(),
        request.uri().path()
    );

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/v1/subscriptions");
        if let Some(value) = value {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_session_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_extract_valid_token() {
        let token = "sess_0123456789abcdef0123456789abcdef";
        let request = request_with_auth(Some(&format!("Bearer {token}")));
        assert_eq!(extract_token_from_request(&request).unwrap(), token);
    }

    #[test]
    fn test_extract_rejects_malformed_headers() {
        for header in [
            None,
            Some("Basic dXNlcjpwYXNz"),
            Some("Bearer sess_short"),
            Some("Bearer tok_0123456789abcdef0123456789abcdef"),
        ] {
            let request = request_with_auth(header);
            let err = extract_token_from_request(&request).unwrap_err();
            assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED, "{header:?}");
        }
    }
}
