//! Transactional unit runner.
//!
//! `run_in_transaction` owns the lifetime of one transaction:
//!
//! 1. Open a transaction on the store
//! 2. Hand the transaction to the caller's work
//! 3. Commit if the work returned `Ok`
//! 4. Roll back if the work failed or the cancellation token fired
//!
//! The work's error is returned unchanged. If the returned future is dropped
//! mid-flight, the transaction handle is dropped with it and rolls back.

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{LedgerTx, Store, StoreError};

/// Run `work` as one atomic unit against `store`.
///
/// `work` receives the transaction handle and must move everything it needs
/// into the returned future.
///
/// # Errors
///
/// - Whatever `work` returns, after rolling back
/// - `StoreError::Cancelled` if `cancel` fires before the work finishes
/// - A classified `StoreError` if the transaction cannot be opened or
///   committed (`Conflict` for write conflicts detected at commit)
pub async fn run_in_transaction<T, E, F>(
    store: &dyn Store,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, E>
where
    F: for<'t> FnOnce(&'t mut dyn LedgerTx) -> BoxFuture<'t, Result<T, E>> + Send,
    T: Send,
    E: From<StoreError> + Send,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled.into());
    }

    let mut tx = store.begin().await?;

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(E::from(StoreError::Cancelled)),
        result = work(tx.as_mut()) => result,
    };

    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                // The backend discards the transaction anyway once the
                // connection is returned; the original error wins.
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::CreateAccountParams;
    use crate::store::{MemoryStore, memory::Operation};
    use crate::test_util::{seed_account, seed_user};
    use std::time::Duration;

    #[tokio::test]
    async fn commits_on_success() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let owner = seed_user(&store).await;
        let cancel = CancellationToken::new();

        let account = run_in_transaction(&store, &cancel, move |tx| {
            Box::pin(async move {
                tx.create_account(CreateAccountParams {
                    owner,
                    balance: 10,
                    currency: "USD".to_string(),
                })
                .await
            })
        })
        .await
        .unwrap();

        let fetched = run_in_transaction(&store, &cancel, move |tx| {
            Box::pin(async move { tx.get_account(account.id).await })
        })
        .await
        .unwrap();
        assert_eq!(fetched, account);
    }

    #[tokio::test]
    async fn rolls_back_and_propagates_work_error() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let account = seed_account(&store, 100, "USD").await;
        let cancel = CancellationToken::new();

        let err = run_in_transaction::<(), StoreError, _>(&store, &cancel, move |tx| {
            Box::pin(async move {
                tx.add_account_balance(account.id, 50).await?;
                Err::<(), _>(StoreError::ConstraintViolation("test".to_string()))
            })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(ref c) if c == "test"));

        assert_eq!(store.committed_account(account.id).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The work would fail with `Conflict` if it ran.
        let err = run_in_transaction::<(), StoreError, _>(&store, &cancel, |_tx| {
            Box::pin(async move { Err(StoreError::Conflict) })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_mid_unit_rolls_back() {
        let store = MemoryStore::new(Duration::from_secs(5));
        let account = seed_account(&store, 100, "USD").await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        let err = run_in_transaction::<(), StoreError, _>(&store, &cancel, move |tx| {
            Box::pin(async move {
                tx.add_account_balance(account.id, -30).await?;
                trigger.cancel();
                // Never resolves; only cancellation ends the unit.
                futures::future::pending::<()>().await;
                Ok::<(), StoreError>(())
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::Cancelled));
        assert_eq!(store.committed_account(account.id).unwrap().balance, 100);
    }

    #[tokio::test]
    async fn commit_failure_is_reported() {
        let store = MemoryStore::new(Duration::from_secs(1));
        let account = seed_account(&store, 100, "USD").await;
        store.inject_fault(Operation::Commit, StoreError::Conflict);
        let cancel = CancellationToken::new();

        let err = run_in_transaction::<_, StoreError, _>(&store, &cancel, move |tx| {
            Box::pin(async move { tx.add_account_balance(account.id, 1).await })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::Conflict));
        assert_eq!(store.committed_account(account.id).unwrap().balance, 100);
    }
}
