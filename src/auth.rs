// src/auth.rs
use crate::error::ApiError;
use crate::models::UserId;
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Issues and verifies the bearer tokens that identify a user to the engine.
pub struct TokenAuthority {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl TokenAuthority {
    pub fn new(secret: impl AsRef<[u8]>, ttl_secs: u64) -> Self {
        TokenAuthority {
            secret: secret.as_ref().to_vec(),
            ttl_secs,
        }
    }

    pub fn create_token(&self, user_id: &UserId) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now().timestamp() as u64 + self.ttl_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(|e| ApiError::unauthorized(format!("could not issue token: {}", e)))
    }

    pub fn verify_token(&self, token: &str) -> Result<UserId, ApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        )
        .map(|data| UserId::new(data.claims.sub))
        .map_err(|e| ApiError::unauthorized(format!("invalid token: {}", e)))
    }

    /// Accepts an `Authorization` header value of the form `Bearer <token>`.
    pub fn verify_bearer(&self, header: &str) -> Result<UserId, ApiError> {
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::unauthorized("expected a bearer token"))?;
        self.verify_token(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_user_id() {
        let auth = TokenAuthority::new("secret", 60);
        let user = UserId::new("user-42");
        let token = auth.create_token(&user).unwrap();
        assert_eq!(auth.verify_bearer(&format!("Bearer {}", token)).unwrap(), user);
    }

    #[test]
    fn rejects_foreign_and_malformed_tokens() {
        let ours = TokenAuthority::new("secret", 60);
        let theirs = TokenAuthority::new("other", 60);
        let token = theirs.create_token(&UserId::new("mallory")).unwrap();

        assert!(ours.verify_token(&token).is_err());
        assert!(ours.verify_bearer(&token).is_err());
        assert!(ours.verify_bearer("Bearer not-a-jwt").is_err());
    }
}
