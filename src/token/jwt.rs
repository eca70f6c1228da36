//! HS256 JSON Web Tokens.

use chrono::DateTime;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Payload, TokenError, TokenMaker};

/// Shortest accepted symmetric key.
pub const MIN_SECRET_KEY_SIZE: usize = 32;

/// Registered JWT claims mapped from `Payload`.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    jti: Uuid,
    sub: String,
    iat: i64,
    exp: i64,
}

pub struct JwtMaker {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtMaker {
    pub fn new(secret_key: &str) -> Result<Self, TokenError> {
        if secret_key.len() < MIN_SECRET_KEY_SIZE {
            return Err(TokenError::InvalidKey {
                min: MIN_SECRET_KEY_SIZE,
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret_key.as_bytes()),
            validation,
        })
    }
}

impl TokenMaker for JwtMaker {
    fn create_token(
        &self,
        username: &str,
        duration: chrono::Duration,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, duration);
        let claims = Claims {
            jti: payload.id,
            sub: payload.username.clone(),
            iat: payload.issued_at.timestamp(),
            exp: payload.expired_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| TokenError::InvalidToken)?;
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
                _ => TokenError::InvalidToken,
            }
        })?;

        let claims = data.claims;
        Ok(Payload {
            id: claims.jti,
            username: claims.sub,
            issued_at: DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::InvalidToken)?,
            expired_at: DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::InvalidToken)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn create_and_verify() {
        let maker = JwtMaker::new(SECRET).unwrap();
        let issued_at = Utc::now();

        let (token, created) = maker.create_token("alice", Duration::minutes(1)).unwrap();
        assert!(!token.is_empty());

        let payload = maker.verify_token(&token).unwrap();
        assert_eq!(payload.id, created.id);
        assert_eq!(payload.username, "alice");
        assert!((payload.issued_at - issued_at).num_seconds().abs() <= 1);
        assert!((payload.expired_at - (issued_at + Duration::minutes(1))).num_seconds().abs() <= 1);
    }

    #[test]
    fn expired_token_is_rejected() {
        let maker = JwtMaker::new(SECRET).unwrap();
        let (token, _) = maker.create_token("alice", -Duration::minutes(1)).unwrap();

        assert!(matches!(
            maker.verify_token(&token),
            Err(TokenError::ExpiredToken)
        ));
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let maker = JwtMaker::new(SECRET).unwrap();
        let other = JwtMaker::new("fedcba9876543210fedcba9876543210").unwrap();
        let (token, _) = other.create_token("alice", Duration::minutes(1)).unwrap();

        assert!(matches!(
            maker.verify_token(&token),
            Err(TokenError::InvalidToken)
        ));
        assert!(matches!(
            maker.verify_token("not.a.token"),
            Err(TokenError::InvalidToken)
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            JwtMaker::new("too-short"),
            Err(TokenError::InvalidKey { min: 32 })
        ));
    }
}
