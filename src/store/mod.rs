//! Ledger store: single-row operations and transactional units.
//!
//! - `Ledger`: every row-level operation on accounts, entries, transfers,
//!   users and sessions
//! - `LedgerTx`: a `Ledger` bound to one open transaction
//! - `Store`: opens transactions against a backend
//! - `run_in_transaction`: the commit-or-rollback wrapper every caller uses
//!
//! Two backends implement these traits: `PgStore` (PostgreSQL via sqlx) and
//! `MemoryStore` (in-process, with real row locks, used by tests and for
//! local development).

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Page,
    account::{Account, CreateAccountParams, UpdateAccountParams},
    entry::{CreateEntryParams, Entry, UpdateEntryParams},
    session::{CreateSessionParams, Session},
    transfer::{CreateTransferParams, Transfer, UpdateTransferParams},
    user::{CreateUserParams, User},
};

pub mod error;
pub mod memory;
pub mod postgres;
pub mod runner;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use runner::run_in_transaction;

/// Row-level operations, each addressed by primary key.
///
/// Every method either returns the row(s) or fails with a classified
/// `StoreError`. Nothing here knows about transfers.
#[async_trait]
pub trait Ledger: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account, StoreError>;
    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError>;
    /// Accounts owned by `owner`, ordered by id.
    async fn list_accounts(&mut self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError>;
    async fn update_account(&mut self, params: UpdateAccountParams) -> Result<Account, StoreError>;
    /// Add `delta` to the balance and return the updated row.
    ///
    /// Takes the account's row lock and keeps it until the unit ends.
    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError>;
    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError>;
    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError>;
    /// Entries posted against `account_id`, ordered by id.
    async fn list_entries(&mut self, account_id: i64, page: Page) -> Result<Vec<Entry>, StoreError>;
    async fn update_entry(&mut self, params: UpdateEntryParams) -> Result<Entry, StoreError>;
    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError>;

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer, StoreError>;
    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError>;
    /// Transfers leaving `from_account_id` or arriving at `to_account_id`,
    /// ordered by id.
    async fn list_transfers(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError>;
    async fn update_transfer(&mut self, params: UpdateTransferParams) -> Result<Transfer, StoreError>;
    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError>;

    async fn create_user(&mut self, params: CreateUserParams) -> Result<User, StoreError>;
    async fn get_user(&mut self, username: &str) -> Result<User, StoreError>;

    async fn create_session(&mut self, params: CreateSessionParams) -> Result<Session, StoreError>;
    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError>;
}

/// A `Ledger` scoped to one open transaction.
///
/// Dropping a `LedgerTx` without calling `commit` rolls it back, so a unit
/// abandoned by an early return, a panic or a dropped future leaves no trace.
#[async_trait]
pub trait LedgerTx: Ledger {
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A transactional backend.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. Row locks taken through the returned handle wait
    /// at most the backend's configured lock timeout.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
