//! Ledger entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One signed line in the append-only ledger.
///
/// Negative amounts are debits, positive amounts are credits. Entries are
/// written once, inside the same unit that moves the account balance.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateEntryParams {
    pub account_id: i64,
    pub amount: i64,
}

/// Administrative correction of an entry amount. Never used by transfers.
#[derive(Debug, Clone, Copy)]
pub struct UpdateEntryParams {
    pub id: i64,
    pub amount: i64,
}
