//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the request/response bodies that carry them over HTTP.

use serde::Deserialize;
use validator::{Validate, ValidationError};

/// Account model
pub mod account;
/// Ledger entry model
pub mod entry;
/// Refresh-token session model
pub mod session;
/// Transfer model and transfer result snapshot
pub mod transfer;
/// User model
pub mod user;

/// Currencies accepted for new accounts and transfers.
pub const SUPPORTED_CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

pub fn is_supported_currency(currency: &str) -> bool {
    SUPPORTED_CURRENCIES.contains(&currency)
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if is_supported_currency(currency) {
        Ok(())
    } else {
        Err(ValidationError::new("currency"))
    }
}

/// Offset/limit window for list operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Convert a 1-based page number into an offset window.
    pub fn from_page_id(page_id: i64, page_size: i64) -> Self {
        Self::new(page_size, (page_id - 1).saturating_mul(page_size))
    }
}

/// Query string for paginated listings (`?page_id=1&page_size=5`).
#[derive(Debug, Deserialize, Validate)]
pub struct PageQuery {
    #[validate(range(min = 1))]
    pub page_id: i64,

    #[validate(range(min = 5, max = 10))]
    pub page_size: i64,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        Page::from_page_id(self.page_id, self.page_size)
    }
}
