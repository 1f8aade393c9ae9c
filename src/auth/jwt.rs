//! HS256 access/refresh tokens.

use chrono::Duration;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};

use crate::core::models::{Claims, TokenPair, TokenType};
use crate::error::{AppError, AppResult};

pub const TOKEN_NOT_VALID: &str = "token_not_valid";

pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Lifetimes used when minting a pair.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        token_type: TokenType,
        lifetime: Duration,
        now: i64,
    ) -> AppResult<(String, Claims)> {
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            token_type,
            iat: now,
            exp: now + lifetime.num_seconds(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Unknown(format!("Failed to sign token: {}", e)))?;
        Ok((token, claims))
    }

    /// Returns the pair plus the claims of the access token, which keys the
    /// session row.
    pub fn issue_pair(
        &self,
        user_id: i64,
        username: &str,
        lifetimes: TokenLifetimes,
        now: i64,
    ) -> AppResult<(TokenPair, Claims)> {
        let (access, access_claims) =
            self.issue(user_id, username, TokenType::Access, lifetimes.access, now)?;
        let (refresh, _) = self.issue(user_id, username, TokenType::Refresh, lifetimes.refresh, now)?;
        Ok((TokenPair { access, refresh }, access_claims))
    }

    /// Signature, expiry (no leeway) and token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let detail = match e.kind() {
                ErrorKind::ExpiredSignature => "Token is expired",
                _ => "Token is invalid",
            };
            AppError::unauthorized(detail, TOKEN_NOT_VALID)
        })?;

        if data.claims.token_type != expected {
            return Err(AppError::unauthorized(
                "Token has wrong type",
                TOKEN_NOT_VALID,
            ));
        }
        Ok(data.claims)
    }
}

/// Hex SHA-256 of a raw token, stored instead of the token itself.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
