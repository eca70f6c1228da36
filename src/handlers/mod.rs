//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Checks that the caller may touch the rows involved
//! 3. Delegates to a service or runs a short transactional unit
//! 4. Returns HTTP response (JSON, status code)

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::services::{transfer_service::TransferService, user_service::UserService};
use crate::store::Store;
use crate::token::TokenMaker;

/// Account management endpoints
pub mod accounts;
/// Ledger entry lookup
pub mod entries;
/// Liveness and store connectivity
pub mod health;
/// Access token renewal
pub mod tokens;
/// Funds transfer endpoints
pub mod transfers;
/// Registration and login
pub mod users;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub transfers: Arc<TransferService>,
    pub users: Arc<UserService>,
    pub token_maker: Arc<dyn TokenMaker>,

    /// Cancelled on shutdown; every unit started by a request observes it.
    pub shutdown: CancellationToken,
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Router fixtures for handler tests.

    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::AppState;
    use crate::services::{
        transfer_service::{TransferPolicy, TransferService},
        user_service::UserService,
    };
    use crate::store::MemoryStore;
    use crate::token::{JwtMaker, TokenMaker};

    pub const SECRET: &str = "0123456789abcdef0123456789abcdef";

    pub struct TestApp {
        pub store: MemoryStore,
        pub router: Router,
        token_maker: JwtMaker,
    }

    impl TestApp {
        pub fn new() -> Self {
            let store = MemoryStore::new(Duration::from_secs(1));
            let token_maker: Arc<dyn TokenMaker> = Arc::new(JwtMaker::new(SECRET).unwrap());
            let state = AppState {
                store: Arc::new(store.clone()),
                transfers: Arc::new(TransferService::new(
                    Arc::new(store.clone()),
                    TransferPolicy::default(),
                )),
                users: Arc::new(UserService::new(
                    Arc::new(store.clone()),
                    Arc::clone(&token_maker),
                    chrono::Duration::minutes(15),
                    chrono::Duration::hours(24),
                )),
                token_maker,
                shutdown: CancellationToken::new(),
            };

            Self {
                store,
                router: crate::app(state),
                token_maker: JwtMaker::new(SECRET).unwrap(),
            }
        }

        /// A valid access token for `username`.
        pub fn token_for(&self, username: &str) -> String {
            self.token_maker
                .create_token(username, chrono::Duration::minutes(1))
                .unwrap()
                .0
        }

        /// Send one request and return the status and parsed JSON body
        /// (`Value::Null` for an empty body).
        pub async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, json)
        }
    }
}
