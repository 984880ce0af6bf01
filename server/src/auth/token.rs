use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::engine::collaborators::{IdentityVerifier, RepositoryError};
use crate::engine::events::UserId;

/// JWT claims for session tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // numeric user id
    pub exp: i64,    // expiry (unix timestamp)
    pub iat: i64,    // issued at
}

/// Create a JWT session token for a user.
pub fn create_session_token(
    user_id: UserId,
    secret: &str,
    expiry_hours: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(expiry_hours)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate a JWT session token and return the claims.
pub fn validate_session_token(
    token: &str,
    secret: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Verifies HS256 session tokens issued by the account service.
pub struct JwtVerifier {
    secret: String,
}

impl JwtVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, RepositoryError> {
        let claims = validate_session_token(token, &self.secret)
            .map_err(|e| RepositoryError::Unauthorized(e.to_string()))?;
        claims
            .sub
            .parse()
            .map_err(|_| RepositoryError::Unauthorized(format!("bad subject: {}", claims.sub)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_roundtrip() {
        let token = create_session_token(42, "test-secret", 1).unwrap();
        let claims = validate_session_token(&token, "test-secret").unwrap();
        assert_eq!(claims.sub, "42");
    }

    #[test]
    fn test_jwt_invalid_secret() {
        let token = create_session_token(42, "secret1", 1).unwrap();
        assert!(validate_session_token(&token, "secret2").is_err());
    }

    #[test]
    fn test_jwt_expiry_is_in_future() {
        let token = create_session_token(1, "test", 1).unwrap();
        let claims = validate_session_token(&token, "test").unwrap();
        let now = Utc::now().timestamp();
        assert!(claims.exp > now);
        assert!(claims.exp <= now + 3610);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = create_session_token(1, "test", -2).unwrap();
        assert!(validate_session_token(&token, "test").is_err());
    }

    #[tokio::test]
    async fn test_verifier_returns_numeric_user_id() {
        let verifier = JwtVerifier::new("s3cret");
        let token = create_session_token(7, "s3cret", 1).unwrap();
        assert_eq!(verifier.verify(&token).await.unwrap(), 7);
        assert!(matches!(
            verifier.verify("not-a-token").await,
            Err(RepositoryError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_verifier_rejects_non_numeric_subject() {
        let now = Utc::now();
        let claims = Claims {
            sub: "did:plc:abc".into(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        let verifier = JwtVerifier::new("s3cret");
        assert!(verifier.verify(&token).await.is_err());
    }
}
