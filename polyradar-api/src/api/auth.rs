//! Shared-secret guard for the webhook callback endpoints
//!
//! When `webhooks.shared_secret` is configured, every callback must carry it
//! in the `x-webhook-secret` header. Without a configured secret the guard
//! lets everything through.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Header carrying the webhook shared secret (inbound and outbound)
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

pub async fn webhook_secret_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.webhooks.shared_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(secret) if secrets_match(secret.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "Webhook rejected: wrong secret");
            Err(ApiError::Unauthorized("Invalid webhook secret".to_string()))
        }
        None => {
            warn!(path = %request.uri().path(), "Webhook rejected: missing secret");
            Err(ApiError::Unauthorized(format!(
                "Missing {} header",
                WEBHOOK_SECRET_HEADER
            )))
        }
    }
}

/// Constant-time comparison
fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    provided.len() == expected.len()
        && provided
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match(b"abc", b"abc"));
        assert!(!secrets_match(b"abc", b"abd"));
        assert!(!secrets_match(b"abc", b"abcd"));
        assert!(!secrets_match(b"", b"abc"));
    }
}
