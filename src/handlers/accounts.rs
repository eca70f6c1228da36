//! Account management HTTP handlers.
//!
//! This module implements the account-related API endpoints:
//! - POST /accounts - Open an account for the caller
//! - GET /accounts - List the caller's accounts
//! - GET /accounts/{id} - Get account by ID
//! - DELETE /accounts/{id} - Close an account
//! - GET /accounts/{id}/entries - Ledger entries of an account
//! - GET /accounts/{id}/transfers - Transfers leaving or reaching an account

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use validator::Validate;

use super::AppState;
use crate::{
    error::AppError,
    models::{
        PageQuery,
        account::{Account, CreateAccountParams, CreateAccountRequest},
        entry::Entry,
        transfer::Transfer,
    },
    store::run_in_transaction,
    token::Payload,
};

/// Load an account and check that the caller owns it.
///
/// # Errors
///
/// - `Store(NotFound)`: no such account (404)
/// - `Unauthorized`: the account belongs to someone else (401)
pub(crate) async fn owned_account(
    state: &AppState,
    payload: &Payload,
    id: i64,
) -> Result<Account, AppError> {
    let account = state.transfers.get_account(id, &state.shutdown).await?;
    if account.owner != payload.username {
        return Err(AppError::Unauthorized(
            "account doesn't belong to the authenticated user".to_string(),
        ));
    }
    Ok(account)
}

/// Open a new account.
///
/// # Endpoint
///
/// `POST /accounts`
///
/// # Request Body
///
/// ```json
/// {
///   "currency": "USD"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the new account, balance 0
/// - **Error (400)**: unsupported currency
/// - **Error (403)**: caller already holds an account in this currency
pub async fn create_account(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    request.validate()?;

    let params = CreateAccountParams {
        owner: payload.username,
        balance: 0,
        currency: request.currency,
    };
    let account = run_in_transaction(state.store.as_ref(), &state.shutdown, move |tx| {
        Box::pin(async move { tx.create_account(params).await })
    })
    .await?;

    tracing::info!(account_id = account.id, owner = %account.owner, "account created");
    Ok((StatusCode::CREATED, Json(account)))
}

/// Get a specific account by ID.
///
/// # Response
///
/// - **Success (200 OK)**: account details
/// - **Error (401)**: account owned by another user
/// - **Error (404)**: account not found
pub async fn get_account(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    let account = owned_account(&state, &payload, id).await?;
    Ok(Json(account))
}

/// List the caller's accounts, ordered by id.
///
/// `GET /accounts?page_id=1&page_size=5` (`page_size` between 5 and 10)
pub async fn list_accounts(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Account>>, AppError> {
    query.validate()?;

    let accounts = state
        .transfers
        .list_accounts(payload.username, query.page(), &state.shutdown)
        .await?;
    Ok(Json(accounts))
}

/// Close an account.
///
/// Accounts referenced by entries or transfers cannot be deleted (403).
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    owned_account(&state, &payload, id).await?;

    run_in_transaction(state.store.as_ref(), &state.shutdown, move |tx| {
        Box::pin(async move { tx.delete_account(id).await })
    })
    .await?;

    tracing::info!(account_id = id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_account_entries(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Entry>>, AppError> {
    query.validate()?;
    owned_account(&state, &payload, id).await?;

    let entries = state
        .transfers
        .list_entries(id, query.page(), &state.shutdown)
        .await?;
    Ok(Json(entries))
}

pub async fn list_account_transfers(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Transfer>>, AppError> {
    query.validate()?;
    owned_account(&state, &payload, id).await?;

    let transfers = state
        .transfers
        .list_transfers(id, query.page(), &state.shutdown)
        .await?;
    Ok(Json(transfers))
}
