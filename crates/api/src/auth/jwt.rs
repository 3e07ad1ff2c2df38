//! JWT encoding and verification.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Claims carried in our access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued at (unix seconds)
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a token for a user. Used by tests and internal tooling; the
    /// production issuer is the account service sharing the same secret.
    pub fn issue(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + self.expiry_hours * 3600,
            iat: now,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    /// Verify a token and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Option<Uuid> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default()).ok()?;
        Uuid::parse_str(&data.claims.sub).ok()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn issued_token_verifies() {
        let manager = JwtManager::new("test-secret", 24);
        let user_id = Uuid::new_v4();
        let token = manager.issue(user_id).unwrap();
        assert_eq!(manager.verify(&token), Some(user_id));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let issuer = JwtManager::new("secret-a", 24);
        let verifier = JwtManager::new("secret-b", 24);
        let token = issuer.issue(Uuid::new_v4()).unwrap();
        assert_eq!(verifier.verify(&token), None);
    }

    #[test]
    fn garbage_token_fails_verification() {
        let manager = JwtManager::new("test-secret", 24);
        assert_eq!(manager.verify("not-a-jwt"), None);
    }
}
