//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::services::transfer_service::{OverdraftPolicy, TransferPolicy};
use crate::token::TokenType;

/// `DATABASE_URL` value that selects the in-process store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string, or `memory://`
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DB_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `TOKEN_SYMMETRIC_KEY` (required): token signing secret, at least 32 bytes
///   (exactly 32 for PASETO)
/// - `TOKEN_TYPE` (optional): `jwt` or `paseto`, defaults to `jwt`
/// - `ACCESS_TOKEN_DURATION_SECS` (optional): defaults to 900
/// - `REFRESH_TOKEN_DURATION_SECS` (optional): defaults to 86400
/// - `LOCK_TIMEOUT_MS` (optional): how long a unit waits for a row lock, defaults to 5000
/// - `MAX_CONFLICT_RETRIES` (optional): defaults to 3
/// - `OVERDRAFT_POLICY` (optional): `allow` or `reject`, defaults to `allow`
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    pub token_symmetric_key: String,

    #[serde(default)]
    pub token_type: TokenType,

    #[serde(default = "default_access_token_duration_secs")]
    pub access_token_duration_secs: i64,

    #[serde(default = "default_refresh_token_duration_secs")]
    pub refresh_token_duration_secs: i64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    #[serde(default)]
    pub overdraft_policy: OverdraftPolicy,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_access_token_duration_secs() -> i64 {
    15 * 60
}

fn default_refresh_token_duration_secs() -> i64 {
    24 * 60 * 60
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_max_conflict_retries() -> u32 {
    3
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (`DATABASE_URL`, `TOKEN_SYMMETRIC_KEY`)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn access_token_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.access_token_duration_secs)
    }

    pub fn refresh_token_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_token_duration_secs)
    }

    pub fn transfer_policy(&self) -> TransferPolicy {
        TransferPolicy {
            max_conflict_retries: self.max_conflict_retries,
            overdraft: self.overdraft_policy,
        }
    }
}
