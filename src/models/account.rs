//! Account data models and API request/response types.
//!
//! This module defines:
//! - `Account`: Database entity representing an account
//! - `CreateAccountParams` / `UpdateAccountParams`: store-level inputs
//! - `CreateAccountRequest`: request body for opening an account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validate_currency;

/// Represents an account record from the database.
///
/// # Balance Storage
///
/// Balances are stored as `i64` in the smallest currency unit. A balance
/// always equals the sum of the entries posted against the account plus the
/// balance it was created with.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier, also the key used for lock ordering
    pub id: i64,

    /// Username of the owning user
    pub owner: String,

    /// Current balance in the smallest currency unit (may be negative
    /// when overdrafts are allowed)
    pub balance: i64,

    /// Currency code, e.g. "USD"
    pub currency: String,

    /// Timestamp when account was created
    pub created_at: DateTime<Utc>,
}

/// Store input for inserting a new account row.
#[derive(Debug, Clone)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

/// Store input for overwriting an account balance.
///
/// Bypasses the ledger; transfers use `Ledger::add_account_balance` instead.
#[derive(Debug, Clone, Copy)]
pub struct UpdateAccountParams {
    pub id: i64,
    pub balance: i64,
}

/// Request body for creating a new account.
///
/// # JSON Example
///
/// ```json
/// {
///   "currency": "USD"
/// }
/// ```
///
/// The owner is always the authenticated user and the balance starts at 0.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}
