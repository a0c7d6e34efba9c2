//! Axum middleware wiring the shield into a router.
//!
//! ```text
//! harden (outer) → [deadline] → inspect → [route guard] → handler
//! ```
//!
//! Denials produced by `inspect` and route guards still pass back through
//! `harden`, so every response carries the header bundle.

mod guard;
mod inspect;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::MethodRouter;
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::security::{RouteGuard, Shield};

pub use guard::route_guard_middleware;
pub use inspect::{harden_middleware, inspect_middleware};

/// Wrap every route of `router` in inspection and response hardening.
pub fn protect(router: Router, shield: Arc<Shield>) -> Router {
    router
        .layer(axum::middleware::from_fn_with_state(
            shield.clone(),
            inspect_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            shield,
            harden_middleware,
        ))
}

/// [`protect`] with a deadline around inspection, body buffering and the
/// handler. A request still running at `deadline` gets a hardened 408.
#[allow(deprecated)]
pub fn protect_with_deadline(router: Router, shield: Arc<Shield>, deadline: Duration) -> Router {
    router
        .layer(axum::middleware::from_fn_with_state(
            shield.clone(),
            inspect_middleware,
        ))
        .layer(TimeoutLayer::new(deadline))
        .layer(axum::middleware::from_fn_with_state(
            shield,
            harden_middleware,
        ))
}

/// Attach `guard` to one route. The guard sees only requests that passed
/// global inspection.
pub fn guard_route<S>(route: MethodRouter<S>, guard: RouteGuard) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.layer(axum::middleware::from_fn_with_state(
        guard,
        route_guard_middleware,
    ))
}
