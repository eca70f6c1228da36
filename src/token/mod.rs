//! Access and refresh tokens.
//!
//! The HTTP layer only depends on the `TokenMaker` trait. `main` wires in
//! either `JwtMaker` or `PasetoMaker`, picked by `TOKEN_TYPE`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod jwt;
pub mod paseto;

pub use jwt::JwtMaker;
pub use paseto::PasetoMaker;

/// Which `TokenMaker` the server signs tokens with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Jwt,
    Paseto,
}

impl TokenType {
    pub fn maker(self, symmetric_key: &str) -> Result<Box<dyn TokenMaker>, TokenError> {
        Ok(match self {
            TokenType::Jwt => Box::new(JwtMaker::new(symmetric_key)?),
            TokenType::Paseto => Box::new(PasetoMaker::new(symmetric_key)?),
        })
    }
}

/// Claims carried by every token this service issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Unique token id; refresh tokens use it as the session id
    pub id: Uuid,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl Payload {
    pub fn new(username: &str, duration: chrono::Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            issued_at,
            expired_at: issued_at + duration,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("secret key must be at least {min} bytes")]
    InvalidKey { min: usize },

    #[error("secret key must be exactly {expected} bytes")]
    KeySize { expected: usize },

    #[error("token is invalid")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,
}

/// Issues and verifies signed tokens.
pub trait TokenMaker: Send + Sync {
    /// Create a token for `username` valid for `duration`.
    fn create_token(
        &self,
        username: &str,
        duration: chrono::Duration,
    ) -> Result<(String, Payload), TokenError>;

    /// Check the signature and expiry of `token` and return its payload.
    fn verify_token(&self, token: &str) -> Result<Payload, TokenError>;
}
