//! Access token renewal.

use axum::{Json, extract::State};

use super::AppState;
use crate::{
    error::AppError,
    models::session::{RenewAccessTokenRequest, RenewAccessTokenResponse},
};

/// Exchange a refresh token for a new access token.
///
/// `POST /tokens/renew-access` with `{"refresh_token": "..."}`.
///
/// # Response
///
/// - **Success (200 OK)**: the new access token and its expiry
/// - **Error (401)**: invalid or expired token, blocked or mismatched session
/// - **Error (404)**: no session for this token
pub async fn renew_access_token(
    State(state): State<AppState>,
    Json(request): Json<RenewAccessTokenRequest>,
) -> Result<Json<RenewAccessTokenResponse>, AppError> {
    let (access_token, access_token_expires_at) = state
        .users
        .renew_access_token(&request.refresh_token, &state.shutdown)
        .await?;

    Ok(Json(RenewAccessTokenResponse {
        access_token,
        access_token_expires_at,
    }))
}
