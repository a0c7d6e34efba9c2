//! Inline request defense for HTTP services.
//!
//! A [`Shield`] inspects each request before it reaches application code:
//! URL length, per-client sliding-window rate limiting with bans, method
//! allow-list, client identifier screening, admin path allow-listing, and
//! XSS / SQL injection / path traversal pattern scans over path, query and
//! JSON body. Admitted responses leave with a defensive header bundle.
//! Individual routes can add stricter throttles with a [`RouteGuard`].
//!
//! The [`http`] module wires this into Axum, either as middleware around an
//! existing router ([`http::protect`]) or as a standalone forwarding server
//! ([`ShieldServer`]).

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::ShieldConfig;
pub use http::ShieldServer;
pub use lifecycle::Shutdown;
pub use security::{Decision, InspectRequest, RouteGuard, Shield, Violation};
