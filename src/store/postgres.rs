//! PostgreSQL backend.
//!
//! Runs every unit inside a sqlx transaction at the default READ COMMITTED
//! isolation. Balance changes are a single `UPDATE ... RETURNING`, which
//! takes the row lock and reads the latest committed balance, so concurrent
//! units touching the same account serialize on that row.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{Ledger, LedgerTx, Store, StoreError};
use crate::db::DbPool;
use crate::models::{
    Page,
    account::{Account, CreateAccountParams, UpdateAccountParams},
    entry::{CreateEntryParams, Entry, UpdateEntryParams},
    session::{CreateSessionParams, Session},
    transfer::{CreateTransferParams, Transfer, UpdateTransferParams},
    user::{CreateUserParams, User},
};

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// `lock_timeout` bounds how long a unit waits for a row lock held by
    /// another unit before failing with `StoreError::Timeout`.
    pub fn new(pool: DbPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not accept bind parameters; the value is an integer
        // we formatted ourselves.
        let lock_timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = {lock_timeout_ms}"))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One open PostgreSQL transaction.
///
/// sqlx rolls the transaction back when it is dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Resolve a foreign-key violation on an insert to the account it names.
///
/// `references` pairs each FK constraint name with the account id bound to it.
fn missing_account(err: sqlx::Error, references: &[(&str, i64)]) -> StoreError {
    match StoreError::classify(err) {
        StoreError::ConstraintViolation(constraint) => references
            .iter()
            .find(|(name, _)| *name == constraint)
            .map(|(_, id)| StoreError::not_found("account", id))
            .unwrap_or(StoreError::ConstraintViolation(constraint)),
        other => other,
    }
}

#[async_trait]
impl Ledger for PgTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account, StoreError> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(params.owner)
        .bind(params.balance)
        .bind(params.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            "SELECT id, owner, balance, currency, created_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn list_accounts(&mut self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE owner = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(accounts)
    }

    async fn update_account(&mut self, params: UpdateAccountParams) -> Result<Account, StoreError> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(params.id)
        .bind(params.balance)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", params.id))
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        // The UPDATE takes FOR NO KEY UPDATE on the row, which does not
        // conflict with the KEY SHARE locks taken by FK checks on inserts.
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("account", id))
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::not_found("account", id));
        }
        Ok(())
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| missing_account(e, &[("entries_account_id_fkey", params.account_id)]))
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn list_entries(&mut self, account_id: i64, page: Page) -> Result<Vec<Entry>, StoreError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn update_entry(&mut self, params: UpdateEntryParams) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(
            r#"
            UPDATE entries
            SET amount = $2
            WHERE id = $1
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(params.id)
        .bind(params.amount)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("entry", params.id))
    }

    async fn delete_entry(&mut self, id: i64) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM entries WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::not_found("entry", id));
        }
        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            missing_account(
                e,
                &[
                    ("transfers_from_account_id_fkey", params.from_account_id),
                    ("transfers_to_account_id_fkey", params.to_account_id),
                ],
            )
        })
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_transfers(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $2
            ORDER BY id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transfers)
    }

    async fn update_transfer(&mut self, params: UpdateTransferParams) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(
            r#"
            UPDATE transfers
            SET amount = $2
            WHERE id = $1
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(params.id)
        .bind(params.amount)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("transfer", params.id))
    }

    async fn delete_transfer(&mut self, id: i64) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::not_found("transfer", id));
        }
        Ok(())
    }

    async fn create_user(&mut self, params: CreateUserParams) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING username, hashed_password, full_name, email, password_changed_at, created_at
            "#,
        )
        .bind(params.username)
        .bind(params.hashed_password)
        .bind(params.full_name)
        .bind(params.email)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn get_user(&mut self, username: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT username, hashed_password, full_name, email, password_changed_at, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("user", username))
    }

    async fn create_session(&mut self, params: CreateSessionParams) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            "#,
        )
        .bind(params.id)
        .bind(params.username)
        .bind(params.refresh_token)
        .bind(params.user_agent)
        .bind(params.client_ip)
        .bind(params.is_blocked)
        .bind(params.expires_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(session)
    }

    async fn get_session(&mut self, id: Uuid) -> Result<Session, StoreError> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, username, refresh_token, user_agent, client_ip, is_blocked, expires_at, created_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| StoreError::not_found("session", id))
    }
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
