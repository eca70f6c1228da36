//! Transfer data models and API request/response types.
//!
//! This module defines:
//! - `Transfer`: Database entity recording one movement between two accounts
//! - `TransferResult`: the consistent snapshot returned by a committed transfer
//! - `CreateTransferRequest`: request body for `POST /transfers`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{account::Account, entry::Entry, validate_currency};

/// Represents a transfer record from the database.
///
/// Every transfer has exactly two entries: `-amount` against
/// `from_account_id` and `+amount` against `to_account_id`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,

    /// Account debited by this transfer
    pub from_account_id: i64,

    /// Account credited by this transfer (never equal to `from_account_id`)
    pub to_account_id: i64,

    /// Amount moved, always positive
    pub amount: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateTransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

/// Administrative correction of a transfer amount. Never used by transfers.
#[derive(Debug, Clone, Copy)]
pub struct UpdateTransferParams {
    pub id: i64,
    pub amount: i64,
}

/// Everything a committed transfer produced.
///
/// All five rows come from the same unit, so the balances agree with the
/// entries as of commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}

impl TransferResult {
    /// Package the rows written by one transfer. No side effects.
    pub fn assemble(
        transfer: Transfer,
        from_entry: Entry,
        to_entry: Entry,
        from_account: Account,
        to_account: Account,
    ) -> Self {
        Self {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        }
    }
}

/// Request to transfer money between accounts.
///
/// # JSON Example
///
/// ```json
/// {
///   "from_account_id": 1,
///   "to_account_id": 2,
///   "amount": 2500,
///   "currency": "USD"
/// }
/// ```
///
/// # Validation
///
/// - Source account must belong to the authenticated user
/// - Both accounts must hold `currency`
/// - Amount must be positive
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransferRequest {
    #[validate(range(min = 1))]
    pub from_account_id: i64,

    #[validate(range(min = 1))]
    pub to_account_id: i64,

    #[validate(range(min = 1))]
    pub amount: i64,

    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
}
