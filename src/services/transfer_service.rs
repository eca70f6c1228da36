//! Transfer service - Core business logic for moving funds between accounts.
//!
//! This service handles:
//! - Argument validation before any store access
//! - The transfer unit: transfer row, two entries, two balance updates
//! - Deadlock-free lock ordering for the balance updates
//! - Bounded retry of units rolled back by a write conflict
//!
//! # Atomicity Guarantees
//!
//! All four steps run inside one transactional unit. Either the transfer,
//! both entries and both balance changes commit together, or none of them
//! is ever visible.
//!
//! # Lock Ordering
//!
//! Two transfers between the same accounts in opposite directions would
//! deadlock if each locked its own source first. Balance updates are
//! therefore applied in ascending account id order, whatever the direction.

use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::models::{
    Page,
    account::Account,
    entry::{CreateEntryParams, Entry},
    transfer::{CreateTransferParams, Transfer, TransferResult},
};
use crate::store::{LedgerTx, Store, StoreError, run_in_transaction};

/// Input of `TransferService::transfer_tx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTxParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    /// Reject requests that can never succeed.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.amount <= 0 {
            return Err(TransferError::InvalidArgument(
                "amount must be positive".to_string(),
            ));
        }
        if self.from_account_id == self.to_account_id {
            return Err(TransferError::InvalidArgument(
                "cannot transfer to the same account".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether a transfer may leave the source account with a negative balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverdraftPolicy {
    #[default]
    Allow,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    /// How many times a unit rolled back by `StoreError::Conflict` is re-run
    pub max_conflict_retries: u32,
    pub overdraft: OverdraftPolicy,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            overdraft: OverdraftPolicy::Allow,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Rejected before touching the store. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The debit would overdraw the source account (only with
    /// `OverdraftPolicy::Reject`).
    #[error("account {account_id} has insufficient funds")]
    InsufficientFunds { account_id: i64, balance: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A signed change to one account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: i64,
    pub amount: i64,
}

/// Order balance changes by ascending account id.
///
/// Every unit that locks several accounts must go through this, so all
/// units acquire row locks in the same total order and no wait cycle can form.
pub fn lock_order(deltas: &[BalanceDelta]) -> Vec<BalanceDelta> {
    let mut ordered = deltas.to_vec();
    ordered.sort_by_key(|delta| delta.account_id);
    ordered
}

/// Apply `deltas` in lock order and return the updated accounts in that order.
async fn apply_balance_deltas(
    tx: &mut dyn LedgerTx,
    deltas: &[BalanceDelta],
) -> Result<Vec<Account>, StoreError> {
    let mut updated = Vec::with_capacity(deltas.len());
    for delta in lock_order(deltas) {
        updated.push(tx.add_account_balance(delta.account_id, delta.amount).await?);
    }
    Ok(updated)
}

fn take_account(accounts: &mut Vec<Account>, id: i64) -> Result<Account, StoreError> {
    let index = accounts
        .iter()
        .position(|a| a.id == id)
        .ok_or_else(|| StoreError::not_found("account", id))?;
    Ok(accounts.swap_remove(index))
}

/// One attempt at the transfer, as a single transactional unit.
async fn transfer_unit(
    store: &dyn Store,
    params: TransferTxParams,
    overdraft: OverdraftPolicy,
    cancel: &CancellationToken,
) -> Result<TransferResult, TransferError> {
    run_in_transaction(store, cancel, move |tx| {
        Box::pin(async move {
            let transfer = tx
                .create_transfer(CreateTransferParams {
                    from_account_id: params.from_account_id,
                    to_account_id: params.to_account_id,
                    amount: params.amount,
                })
                .await?;

            let from_entry = tx
                .create_entry(CreateEntryParams {
                    account_id: params.from_account_id,
                    amount: -params.amount,
                })
                .await?;

            let to_entry = tx
                .create_entry(CreateEntryParams {
                    account_id: params.to_account_id,
                    amount: params.amount,
                })
                .await?;

            let deltas = [
                BalanceDelta {
                    account_id: params.from_account_id,
                    amount: -params.amount,
                },
                BalanceDelta {
                    account_id: params.to_account_id,
                    amount: params.amount,
                },
            ];
            let mut accounts = apply_balance_deltas(tx, &deltas).await?;
            let from_account = take_account(&mut accounts, params.from_account_id)?;
            let to_account = take_account(&mut accounts, params.to_account_id)?;

            // The source row is locked here, so this balance is final for the unit.
            if overdraft == OverdraftPolicy::Reject && from_account.balance < 0 {
                return Err(TransferError::InsufficientFunds {
                    account_id: from_account.id,
                    balance: from_account.balance + params.amount,
                });
            }

            Ok::<_, TransferError>(TransferResult::assemble(
                transfer,
                from_entry,
                to_entry,
                from_account,
                to_account,
            ))
        })
    })
    .await
}

/// Moves funds between accounts and serves the ledger's read passthroughs.
pub struct TransferService {
    store: Arc<dyn Store>,
    policy: TransferPolicy,
}

impl TransferService {
    pub fn new(store: Arc<dyn Store>, policy: TransferPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Move `amount` from one account to another.
    ///
    /// # Process
    ///
    /// 1. Validate arguments (no store access on failure)
    /// 2. Create the transfer row
    /// 3. Create the debit and credit entries
    /// 4. Update both balances, lower account id first
    /// 5. Commit and return the five rows
    ///
    /// A unit rolled back by a write conflict is re-run with the same
    /// arguments up to `max_conflict_retries` times.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: same account on both sides, or amount <= 0
    /// - `InsufficientFunds`: overdraft rejected by policy
    /// - `Store(NotFound)`: either account does not exist
    /// - `Store(Conflict | Unavailable | Timeout | Cancelled)`: the unit was
    ///   rolled back and nothing was written
    pub async fn transfer_tx(
        &self,
        params: TransferTxParams,
        cancel: &CancellationToken,
    ) -> Result<TransferResult, TransferError> {
        params.validate()?;

        let mut retries = 0;
        loop {
            match transfer_unit(self.store.as_ref(), params, self.policy.overdraft, cancel).await {
                Ok(result) => {
                    tracing::info!(
                        transfer_id = result.transfer.id,
                        from_account_id = params.from_account_id,
                        to_account_id = params.to_account_id,
                        amount = params.amount,
                        "transfer committed"
                    );
                    return Ok(result);
                }
                Err(TransferError::Store(StoreError::Conflict))
                    if retries < self.policy.max_conflict_retries =>
                {
                    retries += 1;
                    tracing::warn!(
                        from_account_id = params.from_account_id,
                        to_account_id = params.to_account_id,
                        retry = retries,
                        "transfer hit a write conflict, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn get_account(&self, id: i64, cancel: &CancellationToken) -> Result<Account, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.get_account(id).await })
        })
        .await
    }

    pub async fn list_accounts(
        &self,
        owner: String,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Account>, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.list_accounts(&owner, page).await })
        })
        .await
    }

    pub async fn get_entry(&self, id: i64, cancel: &CancellationToken) -> Result<Entry, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.get_entry(id).await })
        })
        .await
    }

    pub async fn list_entries(
        &self,
        account_id: i64,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Entry>, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.list_entries(account_id, page).await })
        })
        .await
    }

    pub async fn get_transfer(&self, id: i64, cancel: &CancellationToken) -> Result<Transfer, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.get_transfer(id).await })
        })
        .await
    }

    /// Transfers that leave or reach `account_id`.
    pub async fn list_transfers(
        &self,
        account_id: i64,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Transfer>, StoreError> {
        run_in_transaction(self.store(), cancel, move |tx| {
            Box::pin(async move { tx.list_transfers(account_id, account_id, page).await })
        })
        .await
    }
}
