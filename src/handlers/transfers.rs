//! Funds transfer HTTP handlers.
//!
//! - POST /transfers - Move funds from one of the caller's accounts
//! - GET /transfers/{id} - Get a transfer touching one of the caller's accounts

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use validator::Validate;

use super::{AppState, accounts::owned_account};
use crate::{
    error::AppError,
    models::{
        account::Account,
        transfer::{CreateTransferRequest, Transfer, TransferResult},
    },
    services::transfer_service::TransferTxParams,
    store::StoreError,
    token::Payload,
};

fn check_currency(account: &Account, currency: &str) -> Result<(), AppError> {
    if account.currency != currency {
        return Err(AppError::InvalidRequest(format!(
            "account [{}] currency mismatch: {} vs {}",
            account.id, account.currency, currency
        )));
    }
    Ok(())
}

/// Transfer funds between two accounts.
///
/// # Endpoint
///
/// `POST /transfers`
///
/// # Request Body
///
/// ```json
/// {
///   "from_account_id": 1,
///   "to_account_id": 2,
///   "amount": 10,
///   "currency": "USD"
/// }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: the transfer, both entries and both updated accounts
/// - **Error (400)**: invalid body, same account, or currency mismatch
/// - **Error (401)**: source account owned by another user
/// - **Error (404)**: either account not found
/// - **Error (409 / 503 / 504)**: the unit was rolled back; nothing was written
pub async fn create_transfer(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Json(request): Json<CreateTransferRequest>,
) -> Result<Json<TransferResult>, AppError> {
    request.validate()?;

    let from_account = owned_account(&state, &payload, request.from_account_id).await?;
    check_currency(&from_account, &request.currency)?;

    let to_account = state
        .transfers
        .get_account(request.to_account_id, &state.shutdown)
        .await?;
    check_currency(&to_account, &request.currency)?;

    let params = TransferTxParams {
        from_account_id: request.from_account_id,
        to_account_id: request.to_account_id,
        amount: request.amount,
    };
    let result = state.transfers.transfer_tx(params, &state.shutdown).await?;
    Ok(Json(result))
}

/// Get a transfer by ID.
///
/// Visible only when the caller owns one of its two accounts; otherwise the
/// response is 404, as if the transfer did not exist.
pub async fn get_transfer(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
) -> Result<Json<Transfer>, AppError> {
    let transfer = state.transfers.get_transfer(id, &state.shutdown).await?;

    for account_id in [transfer.from_account_id, transfer.to_account_id] {
        let account = state.transfers.get_account(account_id, &state.shutdown).await?;
        if account.owner == payload.username {
            return Ok(Json(transfer));
        }
    }
    Err(StoreError::not_found("transfer", id).into())
}
