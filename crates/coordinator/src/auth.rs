use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub privileged: bool,
    pub exp: usize,
}

/// Mint a privileged bearer token for operator tooling.
pub fn issue_token(secret: &str, ttl_seconds: u64) -> Result<String> {
    let exp = (chrono::Utc::now().timestamp() as u64 + ttl_seconds) as usize;
    let claims = Claims {
        privileged: true,
        exp,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Extractor guarding every route except /submit: requires a valid HS256
/// bearer token carrying the privileged claim.
pub struct Privileged;

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Privileged {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized("authorization header required"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized("bearer token required"))?;

        let claims = verify_token(&state.jwt_secret, token).map_err(|e| {
            warn!(error = %e, "token rejected");
            ApiError::Unauthorized("invalid token")
        })?;

        if !claims.privileged {
            return Err(ApiError::Forbidden("privileged access required"));
        }
        Ok(Privileged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let token = issue_token("secret", 3600).unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert!(claims.privileged);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token("secret", 3600).unwrap();
        assert!(verify_token("other", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let claims = Claims {
            privileged: true,
            exp: 1, // 1970
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify_token("secret", &token).is_err());
    }
}
