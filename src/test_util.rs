//! Fixtures shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::models::{
    account::{Account, CreateAccountParams},
    user::CreateUserParams,
};
use crate::store::{Store, run_in_transaction};

static NEXT_USER: AtomicUsize = AtomicUsize::new(1);

/// Insert a user with a unique username and return the username.
pub async fn seed_user(store: &dyn Store) -> String {
    let n = NEXT_USER.fetch_add(1, Ordering::Relaxed);
    let username = format!("user{n}");
    let params = CreateUserParams {
        username: username.clone(),
        hashed_password: "not-a-real-hash".to_string(),
        full_name: format!("User {n}"),
        email: format!("user{n}@example.com"),
    };

    run_in_transaction(store, &CancellationToken::new(), move |tx| {
        Box::pin(async move { tx.create_user(params).await })
    })
    .await
    .expect("seed user");
    username
}

/// Insert an account with the given opening balance, owned by a fresh user.
pub async fn seed_account(store: &dyn Store, balance: i64, currency: &str) -> Account {
    let owner = seed_user(store).await;
    seed_account_for(store, &owner, balance, currency).await
}

/// Insert an account with the given opening balance for an existing user.
pub async fn seed_account_for(
    store: &dyn Store,
    owner: &str,
    balance: i64,
    currency: &str,
) -> Account {
    let params = CreateAccountParams {
        owner: owner.to_string(),
        balance,
        currency: currency.to_string(),
    };

    run_in_transaction(store, &CancellationToken::new(), move |tx| {
        Box::pin(async move { tx.create_account(params).await })
    })
    .await
    .expect("seed account")
}

/// A driver error as PostgreSQL would report it.
#[derive(Debug)]
struct PgFault {
    code: String,
    constraint: Option<String>,
}

impl std::fmt::Display for PgFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SQLSTATE {}", self.code)
    }
}

impl std::error::Error for PgFault {}

impl sqlx::error::DatabaseError for PgFault {
    fn message(&self) -> &str {
        "simulated database error"
    }

    fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
        Some(std::borrow::Cow::Borrowed(self.code.as_str()))
    }

    fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        match self.code.as_str() {
            "23505" => sqlx::error::ErrorKind::UniqueViolation,
            "23503" => sqlx::error::ErrorKind::ForeignKeyViolation,
            "23502" => sqlx::error::ErrorKind::NotNullViolation,
            "23514" => sqlx::error::ErrorKind::CheckViolation,
            _ => sqlx::error::ErrorKind::Other,
        }
    }
}

/// `sqlx::Error::Database` carrying `code` and, optionally, a constraint name.
pub fn database_error(code: &str, constraint: Option<&str>) -> sqlx::Error {
    sqlx::Error::Database(Box::new(PgFault {
        code: code.to_string(),
        constraint: constraint.map(str::to_string),
    }))
}
