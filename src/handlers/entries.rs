//! Ledger entry lookup.

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::AppState;
use crate::{error::AppError, models::entry::Entry, store::StoreError, token::Payload};

/// Get an entry by ID.
///
/// `GET /entries/{id}`. Entries on accounts the caller doesn't own are
/// reported as not found.
pub async fn get_entry(
    State(state): State<AppState>,
    Extension(payload): Extension<Payload>,
    Path(id): Path<i64>,
) -> Result<Json<Entry>, AppError> {
    let entry = state.transfers.get_entry(id, &state.shutdown).await?;
    let account = state
        .transfers
        .get_account(entry.account_id, &state.shutdown)
        .await?;

    if account.owner != payload.username {
        return Err(StoreError::not_found("entry", id).into());
    }
    Ok(Json(entry))
}
