//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline, route guards, sweeper, reloads produce:
//!     → logging.rs (structured log events; one warn record per denial)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! Request IDs come from the tower-http layers in `http::server` and show
//! up on every span `TraceLayer` opens.

pub mod logging;
pub mod metrics;
