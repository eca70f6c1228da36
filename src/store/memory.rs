//! In-process backend with row-level locking.
//!
//! Mirrors what the PostgreSQL backend relies on:
//! - Account writes take a per-row lock held until the unit ends
//! - Writes are staged per unit and become visible to others only on commit
//! - Reads see committed rows plus the unit's own staged writes
//! - Foreign-key, uniqueness and check constraints of the SQL schema
//!
//! Faults can be injected per operation to exercise failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use super::error::NUMERIC_OUT_OF_RANGE;
use super::{Ledger, LedgerTx, Store, StoreError};
use crate::models::{
    Page,
    account::{Account, CreateAccountParams, UpdateAccountParams},
    entry::{CreateEntryParams, Entry, UpdateEntryParams},
    session::{CreateSessionParams, Session},
    transfer::{CreateTransferParams, Transfer, UpdateTransferParams},
    user::{CreateUserParams, User, password_never_changed},
};

/// Store operations that can be made to fail with `MemoryStore::inject_fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Begin,
    CreateTransfer,
    CreateEntry,
    AddAccountBalance,
    Commit,
}

/// In-memory store. Cloning shares the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<i64, Arc<RowLock<()>>>>,
    faults: Mutex<Vec<(Operation, StoreError)>>,
    lock_timeout: Duration,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    users: BTreeMap<String, User>,
    sessions: HashMap<Uuid, Session>,
    last_account_id: i64,
    last_entry_id: i64,
    last_transfer_id: i64,
}

/// Writes staged by one unit. `None` marks a deleted row.
#[derive(Default)]
struct Changes {
    accounts: BTreeMap<i64, Option<Account>>,
    entries: BTreeMap<i64, Option<Entry>>,
    transfers: BTreeMap<i64, Option<Transfer>>,
    users: BTreeMap<String, User>,
    sessions: HashMap<Uuid, Session>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

impl Shared {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| poisoned())
    }

    fn take_fault(&self, operation: Operation) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().map_err(|_| poisoned())?;
        match faults.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(faults.remove(index).1),
            None => Ok(()),
        }
    }

    fn row_lock(&self, account_id: i64) -> Result<Arc<RowLock<()>>, StoreError> {
        let mut locks = self.row_locks.lock().map_err(|_| poisoned())?;
        Ok(Arc::clone(locks.entry(account_id).or_default()))
    }
}

impl MemoryStore {
    /// `lock_timeout` bounds how long a unit waits for another unit's row lock.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(Vec::new()),
                lock_timeout,
            }),
        }
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn inject_fault(&self, operation: Operation, error: StoreError) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.push((operation, error));
        }
    }

    /// Committed state of an account, bypassing any open unit.
    pub fn committed_account(&self, id: i64) -> Option<Account> {
        self.shared.tables().ok()?.accounts.get(&id).cloned()
    }

    /// Committed entries posted against `account_id`, in id order.
    pub fn committed_entries(&self, account_id: i64) -> Vec<Entry> {
        self.shared
            .tables()
            .map(|t| {
                t.entries
                    .values()
                    .filter(|e| e.account_id == account_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All committed transfers, in id order.
    pub fn committed_transfers(&self) -> Vec<Transfer> {
        self.shared
            .tables()
            .map(|t| t.transfers.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        self.shared.take_fault(Operation::Begin)?;
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            changes: Changes::default(),
            row_guards: HashMap::new(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.shared.tables().map(|_| ())
    }
}

/// One open unit against a `MemoryStore`.
///
/// Dropping it discards the staged changes and releases every row lock,
/// which is exactly a rollback.
pub struct MemoryTx {
    shared: Arc<Shared>,
    changes: Changes,
    row_guards: HashMap<i64, OwnedMutexGuard<()>>,
}

/// Committed rows overlaid with staged ones, in key order.
fn overlay<K: Ord + Clone, V: Clone>(
    committed: &BTreeMap<K, V>,
    staged: &BTreeMap<K, Option<V>>,
) -> Vec<V> {
    let mut merged: BTreeMap<K, V> = committed.clone();
    for (key, row) in staged {
        match row {
            Some(row) => {
                merged.insert(key.clone(), row.clone());
            }
            None => {
                merged.remove(key);
            }
        }
    }
    merged.into_values().collect()
}

fn paginate<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    let offset = usize::try_from(page.offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit.max(0)).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

impl MemoryTx {
    fn visible_account(&self, id: i64) -> Result<Account, StoreError> {
        match self.changes.accounts.get(&id) {
            Some(Some(account)) => Ok(account.clone()),
            Some(None) => Err(StoreError::not_found("account", id)),
            None => self
                .shared
                .tables()?
                .accounts
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("account", id)),
        }
    }

    fn visible_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.changes.users.get(username) {
            return Ok(Some(user.clone()));
        }
        Ok(self.shared.tables()?.users.get(username).cloned())
    }

    fn visible_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(overlay(&self.shared.tables()?.accounts, &self.changes.accounts))
    }

    fn visible_entries(&self) -> Result<Vec<Entry>, StoreError> {
        Ok(overlay(&self.shared.tables()?.entries, &self.changes.entries))
    }

    fn visible_transfers(&self) -> Result<Vec<Transfer>, StoreError> {
        Ok(overlay(&self.shared.tables()?.transfers, &self.changes.transfers))
    }

    fn visible_entry(&self, id: i64) -> Result<Entry, StoreError> {
        let row = match self.changes.entries.get(&id) {
            Some(row) => row.clone(),
            None => self.shared.tables()?.entries.get(&id).cloned(),
        };
        row.ok_or_else(|| StoreError::not_found("entry", id))
    }

    fn visible_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        let row = match self.changes.transfers.get(&id) {
            Some(row) => row.clone(),
            None => self.shared.tables()?.transfers.get(&id).cloned(),
        };
        row.ok_or_else(|| StoreError::not_found("transfer", id))
    }

    /// Take the row lock for `account_id` unless this unit already holds it.
    async fn lock_account(&mut self, account_id: i64) -> Result<(), StoreError> {
        if self.row_guards.contains_key(&account_id) {
            return Ok(());
        }

        let lock = self.shared.row_lock(account_id)?;
        let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::Timeout)?;
        self.row_guards.insert(account_id, guard);
        Ok(())
    }

    /// Lock the account row, then read its latest version.
    ///
    /// Commits apply before their row locks are released, so the committed
    /// row read after locking can no longer change under this unit.
    async fn lock_and_read_account(&mut self, id: i64) -> Result<Account, StoreError> {
        self.visible_account(id)?;
        self.lock_account(id).await?;
        self.visible_account(id)
    }
}

#[async_trait]
impl Ledger for MemoryTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account, StoreError> {
        if self.visible_user(&params.owner)?.is_none() {
            return Err(StoreError::ConstraintViolation(
                "accounts_owner_fkey".to_string(),
            ));
        }
        if self
            .visible_accounts()?
            .iter()
            .any(|a| a.owner == params.owner && a.currency == params.currency)
        {
            return Err(StoreError::ConstraintViolation(
                "accounts_owner_currency_key".to_string(),
            ));
        }

        let id = {
            let mut tables = self.shared.tables()?;
            tables.last_account_id += 1;
            tables.last_account_id
        };
        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: now(),
        };
        self.changes.accounts.insert(id, Some(account.clone()));
        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        self.visible_account(id)
    }

    async fn list_accounts(&mut self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError> {
        let accounts = self
            .visible_accounts()?
            .into_iter()
            .filter(|a| a.owner == owner)
            .collect();
        Ok(paginate(accounts, page))
    }

    async fn update_account(&mut self, params: UpdateAccountParams) -> Result<Account, StoreError> {
        let mut account = self.lock_and_read_account(params.id).await?;
        account.balance = params.balance;
        self.changes.accounts.insert(params.id, Some(account.clone()));
        Ok(account)
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        self.shared.take_fault(Operation::AddAccountBalance)?;

        let mut account = self.lock_and_read_account(id).await?;
        account.balance = account
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::ConstraintViolation(NUMERIC_OUT_OF_RANGE.to_string()))?;
        self.changes.accounts.insert(id, Some(account.clone()));
        Ok(account)
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError> {
        self.lock_and_read_account(id).await?;

        if self.visible_entries()?.iter().any(|e| e.account_id == id) {
            return Err(StoreError::ConstraintViolation(
                "entries_account_id_fkey".to_string(),
            ));
        }
        if self
            .visible_transfers()?
            .iter()
            .any(|t| t.from_account_id == id || t.to_account_id == id)
        {
            return Err(StoreError::ConstraintViolation(
                "transfers_from_account_id_fkey".to_string(),
            ));
        }

        self.changes.accounts.insert(id, None);
        Ok(())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        self.shared.take_fault(Operation::CreateEntry)?;
        self.visible_account(params.account_id)?;

        let id = {
            let mut tables = self.shared.tables()?;
            tables.last_entry_id += 1;
            tables.last_entry_id
        };
        let entry = Entry {
            id,
            account_id: params.account_id,
            amount: params.amount,
            created_at: now(),
        };
        self.changes.entries.insert(id, Some(entry.clone()));
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        self.visible_entry(id)
    }

    async fn list_entries(&mut self, account_id: i64, page: Page) -> Result<Vec<Entry>, StoreError> {
        let entries = self
            .visible_entries()?
            .into_iter()
            .filter(|e| e.account_id == account_id)
            .collect();
        Ok(paginate(entries, page))
    }

    async fn update_entry(&mut self, params: UpdateEntryParams) -> Result<Entry, StoreError> {
        let mut entry = self.visible_entry(params.id)?;
        entry.amount = params.amount;
        self.changes.entries.insert(params.id, Some(entry.clone()));
        Ok(entry)
    }

    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError> {
        self.visible_entry(id)?;
        self.changes.entries.insert(id, None);
        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer, StoreError> {
        self.shared.take_fault(Operation::CreateTransfer)?;
        self.visible_account(params.from_account_id)?;
        self.visible_account(params.to_account_id)?;

        if params.amount <= 0 {
            return Err(StoreError::ConstraintViolation(
                "transfers_amount_check".to_string(),
            ));
        }
        if params.from_account_id == params.to_account_id {
            return Err(StoreError::ConstraintViolation(
                "transfers_distinct_accounts".to_string(),
            ));
        }

        let id = {
            let mut tables = self.shared.tables()?;
            tables.last_transfer_id += 1;
            tables.last_transfer_id
        };
        let transfer = Transfer {
            id,
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: now(),
        };
        self.changes.transfers.insert(id, Some(transfer.clone()));
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        self.visible_transfer(id)
    }

    async fn list_transfers(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError> {
        let transfers = self
            .visible_transfers()?
            .into_iter()
            .filter(|t| t.from_account_id == from_account_id || t.to_account_id == to_account_id)
            .collect();
        Ok(paginate(transfers, page))
    }

    async fn update_transfer(&mut self, params: UpdateTransferParams) -> Result<Transfer, StoreError> {
        if params.amount <= 0 {
            return Err(StoreError::ConstraintViolation(
                "transfers_amount_check".to_string(),
            ));
        }
        let mut transfer = self.visible_transfer(params.id)?;
        transfer.amount = params.amount;
        self.changes.transfers.insert(params.id, Some(transfer.clone()));
        Ok(transfer)
    }

    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError> {
        self.visible_transfer(id)?;
        self.changes.transfers.insert(id, None);
        Ok(())
    }

    async fn create_user(&mut self, params: CreateUserParams) -> Result<User, StoreError> {
        if self.visible_user(&params.username)?.is_some() {
            return Err(StoreError::ConstraintViolation("users_pkey".to_string()));
        }
        let email_taken = {
            let tables = self.shared.tables()?;
            tables
                .users
                .values()
                .chain(self.changes.users.values())
                .any(|u| u.email == params.email)
        };
        if email_taken {
            return Err(StoreError::ConstraintViolation(
                "users_email_key".to_string(),
            ));
        }

        let user = User {
            username: params.username,
            hashed_password: params.hashed_password,
            full_name: params.full_name,
            email: params.email,
            password_changed_at: password_never_changed(),
            created_at: now(),
        };
        self.changes.users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&mut self, username: &str) -> Result<User, StoreError> {
        self.visible_user(username)?
            .ok_or_else(|| StoreError::not_found("user", username))
    }

    async fn create_session(&mut self, params: CreateSessionParams) -> Result<Session, StoreError> {
        if self.visible_user(&params.username)?.is_none() {
            return Err(StoreError::ConstraintViolation(
                "sessions_username_fkey".to_string(),
            ));
        }
        let exists = self.changes.sessions.contains_key(&params.id)
            || self.shared.tables()?.sessions.contains_key(&params.id);
        if exists {
            return Err(StoreError::ConstraintViolation("sessions_pkey".to_string()));
        }

        let session = Session {
            id: params.id,
            username: params.username,
            refresh_token: params.refresh_token,
            user_agent: params.user_agent,
            client_ip: params.client_ip,
            is_blocked: params.is_blocked,
            expires_at: params.expires_at,
            created_at: now(),
        };
        self.changes.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError> {
        if let Some(session) = self.changes.sessions.get(&id) {
            return Ok(session.clone());
        }
        self.shared
            .tables()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("session", id))
    }
}

/// Unique keys can race between units that each passed their own check;
/// the loser fails at commit like a PostgreSQL unique index would.
fn check_unique_keys(tables: &Tables, changes: &Changes) -> Result<(), StoreError> {
    for user in changes.users.values() {
        if tables.users.contains_key(&user.username) {
            return Err(StoreError::ConstraintViolation("users_pkey".to_string()));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::ConstraintViolation(
                "users_email_key".to_string(),
            ));
        }
    }

    let new_accounts = changes
        .accounts
        .iter()
        .filter(|(id, _)| !tables.accounts.contains_key(id))
        .filter_map(|(_, account)| account.as_ref());
    for account in new_accounts {
        if tables
            .accounts
            .values()
            .any(|a| a.owner == account.owner && a.currency == account.currency)
        {
            return Err(StoreError::ConstraintViolation(
                "accounts_owner_currency_key".to_string(),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            shared,
            changes,
            row_guards,
        } = *self;

        shared.take_fault(Operation::Commit)?;

        {
            let mut tables = shared.tables()?;
            check_unique_keys(&tables, &changes)?;

            for (id, row) in changes.accounts {
                match row {
                    Some(account) => tables.accounts.insert(id, account),
                    None => tables.accounts.remove(&id),
                };
            }
            for (id, row) in changes.entries {
                match row {
                    Some(entry) => tables.entries.insert(id, entry),
                    None => tables.entries.remove(&id),
                };
            }
            for (id, row) in changes.transfers {
                match row {
                    Some(transfer) => tables.transfers.insert(id, transfer),
                    None => tables.transfers.remove(&id),
                };
            }
            tables.users.extend(changes.users);
            tables.sessions.extend(changes.sessions);
        }

        // Row locks are released only after the new rows are visible.
        drop(row_guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        tracing::debug!(
            held_locks = self.row_guards.len(),
            "rolling back memory transaction"
        );
        Ok(())
    }
}
