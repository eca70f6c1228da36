//! Ledger Transfer Server - Main Application Entry Point
//!
//! A REST API for a double-entry ledger: users open accounts and move funds
//! between them. Every transfer writes a transfer row, two entries and two
//! balance updates as one atomic unit.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Store**: PostgreSQL with sqlx, or an in-process store (`DATABASE_URL=memory://`)
//! - **Authentication**: Bearer JWT or PASETO access tokens, refresh-token sessions
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open the store (pool + migrations for PostgreSQL)
//! 3. Build services and the HTTP router
//! 4. Serve until Ctrl+C, then cancel in-flight units and drain

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;
mod token;

#[cfg(test)]
mod test_util;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::handlers::AppState;
use crate::services::{transfer_service::TransferService, user_service::UserService};
use crate::store::{MemoryStore, PgStore, Store};
use crate::token::TokenMaker;

/// Build the HTTP router.
///
/// Everything except health, registration, login and token renewal sits
/// behind the bearer token middleware.
pub fn app(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route(
            "/accounts",
            post(handlers::accounts::create_account).get(handlers::accounts::list_accounts),
        )
        .route(
            "/accounts/{id}",
            get(handlers::accounts::get_account).delete(handlers::accounts::delete_account),
        )
        .route(
            "/accounts/{id}/entries",
            get(handlers::accounts::list_account_entries),
        )
        .route(
            "/accounts/{id}/transfers",
            get(handlers::accounts::list_account_transfers),
        )
        .route("/transfers", post(handlers::transfers::create_transfer))
        .route("/transfers/{id}", get(handlers::transfers::get_transfer))
        .route("/entries/{id}", get(handlers::entries::get_entry))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/users", post(handlers::users::create_user))
        .route("/users/login", post(handlers::users::login_user))
        .route(
            "/tokens/renew-access",
            post(handlers::tokens::renew_access_token),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn open_store(config: &config::Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store; data is lost on exit");
        return Ok(Arc::new(MemoryStore::new(config.lock_timeout())));
    }

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    Ok(Arc::new(PgStore::new(pool, config.lock_timeout())))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown requested, cancelling in-flight units");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let store = open_store(&config).await?;
    let token_maker: Arc<dyn TokenMaker> =
        Arc::from(config.token_type.maker(&config.token_symmetric_key)?);
    tracing::info!(token_type = ?config.token_type, "Token maker ready");

    let state = AppState {
        transfers: Arc::new(TransferService::new(
            Arc::clone(&store),
            config.transfer_policy(),
        )),
        users: Arc::new(UserService::new(
            Arc::clone(&store),
            Arc::clone(&token_maker),
            config.access_token_duration(),
            config.refresh_token_duration(),
        )),
        store,
        token_maker,
        shutdown: CancellationToken::new(),
    };
    let shutdown = state.shutdown.clone();

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}
