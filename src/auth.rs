/// Authentication extractors and utilities
///
/// Sign-up and login live in a separate service which issues HS256 access
/// tokens; the `sub` claim carries the numeric user id.
use crate::{context::AppContext, error::OneLightError};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The logged-in caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: i64,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthUser {
    type Rejection = OneLightError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            OneLightError::Authentication("Missing authorization header".to_string())
        })?;

        let claims = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;
        let user_id = claims.sub.parse::<i64>().map_err(|_| {
            OneLightError::Authentication("Invalid token: 'sub' is not a user id".to_string())
        })?;

        Ok(AuthUser { user_id })
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Verify signature and expiry, returning the claims
pub fn verify_jwt_token(token: &str, jwt_secret: &str) -> Result<Claims, OneLightError> {
    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    OneLightError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    OneLightError::Authentication("Invalid token signature".to_string())
                }
                _ => OneLightError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}

/// Mint an access token the way the login service does
pub fn issue_token(
    user_id: i64,
    username: Option<&str>,
    ttl: chrono::Duration,
    jwt_secret: &str,
) -> Result<String, OneLightError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp(),
        username: username.map(str::to_string),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| OneLightError::Internal(format!("Failed to sign token: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-that-is-long-enough-for-hs256";

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn test_issued_token_verifies() {
        let token = issue_token(7, Some("alice"), chrono::Duration::hours(1), SECRET).unwrap();
        let claims = verify_jwt_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_wrong_secret_and_expiry_are_rejected() {
        let token = issue_token(7, None, chrono::Duration::hours(1), SECRET).unwrap();
        assert!(matches!(
            verify_jwt_token(&token, "another-secret-that-is-long-enough-too"),
            Err(OneLightError::Authentication(_))
        ));

        let stale = issue_token(7, None, chrono::Duration::hours(-2), SECRET).unwrap();
        assert!(matches!(
            verify_jwt_token(&stale, SECRET),
            Err(OneLightError::Authentication(_))
        ));
    }
}
