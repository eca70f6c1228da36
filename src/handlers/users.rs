//! Registration and login handlers.
//!
//! - POST /users - Register
//! - POST /users/login - Exchange credentials for access and refresh tokens

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::USER_AGENT},
};
use validator::Validate;

use super::AppState;
use crate::{
    error::AppError,
    models::user::{CreateUserRequest, LoginUserRequest, LoginUserResponse, UserResponse},
    services::user_service::ClientInfo,
};

fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    let forwarded = header("x-forwarded-for");
    let client_ip = match forwarded.split(',').next().map(str::trim) {
        Some(ip) if !ip.is_empty() => ip.to_string(),
        _ => header("x-real-ip"),
    };

    ClientInfo {
        user_agent: header(USER_AGENT.as_str()),
        client_ip,
    }
}

/// Register a new user.
///
/// # Request Body
///
/// ```json
/// {
///   "username": "alice",
///   "password": "secret123",
///   "full_name": "Alice Example",
///   "email": "alice@example.com"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the user, without the password hash
/// - **Error (400)**: invalid body
/// - **Error (403)**: username or email already taken
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    request.validate()?;

    let user = state.users.create_user(request, &state.shutdown).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Log in.
///
/// # Response
///
/// - **Success (200 OK)**: session id, both tokens and their expiry, the user
/// - **Error (401)**: wrong password
/// - **Error (404)**: unknown user
pub async fn login_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginUserRequest>,
) -> Result<Json<LoginUserResponse>, AppError> {
    request.validate()?;

    let outcome = state
        .users
        .login_user(request, client_info(&headers), &state.shutdown)
        .await?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};
    use serde_json::json;

    use super::*;
    use crate::handlers::test_support::TestApp;

    #[test]
    fn client_info_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("curl/8"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.9.9.9"));

        let info = client_info(&headers);
        assert_eq!(info.user_agent, "curl/8");
        assert_eq!(info.client_ip, "10.0.0.1");

        headers.remove("x-forwarded-for");
        assert_eq!(client_info(&headers).client_ip, "10.9.9.9");
    }

    #[tokio::test]
    async fn register_login_and_use_token() {
        let app = TestApp::new();

        let (status, body) = app
            .send(
                "POST",
                "/users",
                None,
                Some(json!({
                    "username": "frank",
                    "password": "secret123",
                    "full_name": "Frank Example",
                    "email": "frank@example.com",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["username"], "frank");
        assert!(body.get("hashed_password").is_none());

        let (status, body) = app
            .send(
                "POST",
                "/users/login",
                None,
                Some(json!({ "username": "frank", "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let access_token = body["access_token"].as_str().unwrap().to_string();
        assert!(body["refresh_token"].is_string());
        assert_eq!(body["user"]["email"], "frank@example.com");

        let (status, body) = app
            .send("POST", "/accounts", Some(&access_token), Some(json!({ "currency": "CAD" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["owner"], "frank");
    }

    #[tokio::test]
    async fn registration_and_login_errors() {
        let app = TestApp::new();

        let (status, _) = app
            .send(
                "POST",
                "/users",
                None,
                Some(json!({
                    "username": "bad name!",
                    "password": "secret123",
                    "full_name": "Bad",
                    "email": "bad@example.com",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/users",
                None,
                Some(json!({
                    "username": "grace",
                    "password": "short",
                    "full_name": "Grace",
                    "email": "grace@example.com",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(
                "POST",
                "/users/login",
                None,
                Some(json!({ "username": "nobody", "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
