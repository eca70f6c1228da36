//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Verify its signature and expiry with the configured `TokenMaker`
//! 3. Inject the token `Payload` into the request
//! 4. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, handlers::AppState};

/// Authorization scheme accepted by the middleware (case-insensitive).
pub const AUTHORIZATION_TYPE_BEARER: &str = "bearer";

/// Token authentication middleware function.
///
/// # Headers
///
/// Expected header format:
/// ```text
/// Authorization: Bearer <access token>
/// ```
///
/// Handlers behind this middleware read the caller with
/// `Extension<Payload>`.
///
/// # Returns
///
/// - `Ok(Response)` if authenticated successfully (calls next handler)
/// - `Err(AppError::Unauthorized | AppError::Token)` otherwise (returns 401)
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("authorization header is not provided".to_string()))?;

    let mut fields = auth_header.split_whitespace();
    let (scheme, token) = match (fields.next(), fields.next(), fields.next()) {
        (Some(scheme), Some(token), None) => (scheme, token),
        _ => {
            return Err(AppError::Unauthorized(
                "invalid authorization header format".to_string(),
            ));
        }
    };

    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_TYPE_BEARER) {
        return Err(AppError::Unauthorized(format!(
            "unsupported authorization type {scheme}"
        )));
    }

    let payload = state.token_maker.verify_token(token)?;
    request.extensions_mut().insert(payload);

    Ok(next.run(request).await)
}
