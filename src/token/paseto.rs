//! PASETO v4.local tokens (XChaCha20 + BLAKE2b, symmetric key).

use chrono::{DateTime, Utc};
use pasetors::{
    Local,
    claims::{Claims, ClaimsValidationRules},
    keys::SymmetricKey,
    local,
    token::UntrustedToken,
    version4::V4,
};
use uuid::Uuid;

use super::{Payload, TokenError, TokenMaker};

/// v4.local keys are exactly this long.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Private claim holding `Payload::expired_at`; checked here rather than by
/// pasetors so an expired token is told apart from a forged one.
const EXPIRED_AT_CLAIM: &str = "expired_at";

pub struct PasetoMaker {
    key: SymmetricKey<V4>,
}

impl PasetoMaker {
    pub fn new(symmetric_key: &str) -> Result<Self, TokenError> {
        if symmetric_key.len() != SYMMETRIC_KEY_SIZE {
            return Err(TokenError::KeySize {
                expected: SYMMETRIC_KEY_SIZE,
            });
        }

        let key = SymmetricKey::<V4>::from(symmetric_key.as_bytes()).map_err(|_| {
            TokenError::KeySize {
                expected: SYMMETRIC_KEY_SIZE,
            }
        })?;
        Ok(Self { key })
    }
}

fn string_claim<'a>(claims: &'a Claims, name: &str) -> Result<&'a str, TokenError> {
    claims
        .get_claim(name)
        .and_then(|value| value.as_str())
        .ok_or(TokenError::InvalidToken)
}

fn time_claim(claims: &Claims, name: &str) -> Result<DateTime<Utc>, TokenError> {
    DateTime::parse_from_rfc3339(string_claim(claims, name)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| TokenError::InvalidToken)
}

impl TokenMaker for PasetoMaker {
    fn create_token(
        &self,
        username: &str,
        duration: chrono::Duration,
    ) -> Result<(String, Payload), TokenError> {
        let payload = Payload::new(username, duration);

        let build = || -> Result<Claims, pasetors::errors::Error> {
            let mut claims = Claims::new()?;
            claims.non_expiring();
            claims.token_identifier(&payload.id.to_string())?;
            claims.subject(&payload.username)?;
            claims.issued_at(&payload.issued_at.to_rfc3339())?;
            claims.not_before(&payload.issued_at.to_rfc3339())?;
            claims.add_additional(EXPIRED_AT_CLAIM, payload.expired_at.to_rfc3339())?;
            Ok(claims)
        };
        let claims = build().map_err(|_| TokenError::InvalidToken)?;

        let token = local::encrypt(&self.key, &claims, None, None)
            .map_err(|_| TokenError::InvalidToken)?;
        Ok((token, payload))
    }

    fn verify_token(&self, token: &str) -> Result<Payload, TokenError> {
        let untrusted = UntrustedToken::<Local, V4>::try_from(token)
            .map_err(|_| TokenError::InvalidToken)?;

        let mut rules = ClaimsValidationRules::new();
        rules.allow_non_expiring();
        let trusted = local::decrypt(&self.key, &untrusted, &rules, None, None)
            .map_err(|_| TokenError::InvalidToken)?;
        let claims = trusted.payload_claims().ok_or(TokenError::InvalidToken)?;

        let payload = Payload {
            id: Uuid::parse_str(string_claim(claims, "jti")?)
                .map_err(|_| TokenError::InvalidToken)?,
            username: string_claim(claims, "sub")?.to_string(),
            issued_at: time_claim(claims, "iat")?,
            expired_at: time_claim(claims, EXPIRED_AT_CLAIM)?,
        };

        if Utc::now() > payload.expired_at {
            return Err(TokenError::ExpiredToken);
        }
        Ok(payload)
    }
}
