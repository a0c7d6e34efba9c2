//! Read-only admin API.
//!
//! Served on its own listener, never through the shield. Every route
//! requires `Authorization: Bearer <admin.api_key>`.
//!
//! - `GET /admin/status`: version, uptime, ledger sizes
//! - `GET /admin/rules`: the active rule set, summarized
//! - `GET /admin/bans`: active bans with remaining time

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::security::Shield;

use self::auth::admin_auth_middleware;
use self::handlers::{get_bans, get_rules, get_status};

#[derive(Clone)]
pub struct AdminState {
    pub shield: Arc<Shield>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(shield: Arc<Shield>, api_key: &str) -> Self {
        Self {
            shield,
            api_key: Arc::from(api_key),
            started: Instant::now(),
        }
    }
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/rules", get(get_rules))
        .route("/admin/bans", get(get_bans))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
