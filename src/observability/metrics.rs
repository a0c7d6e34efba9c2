//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shield_requests_total` (counter): inspections by outcome (allowed, denied)
//! - `shield_denials_total` (counter): denials by violation
//! - `shield_inspection_duration_seconds` (histogram): pipeline latency
//! - `shield_active_bans` (gauge): bans held after the last sweep
//! - `shield_route_throttled_total` (counter): route guard rejections by route, check
//! - `shield_rule_reloads_total` (counter): reload attempts by result
//!
//! Without an installed recorder every call here is a no-op, so library
//! users and tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::security::Decision;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one pipeline decision and how long it took.
pub fn record_inspection(decision: &Decision, started: Instant) {
    histogram!("shield_inspection_duration_seconds").record(started.elapsed().as_secs_f64());

    match decision.violation {
        None => counter!("shield_requests_total", "outcome" => "allowed").increment(1),
        Some(violation) => {
            counter!("shield_requests_total", "outcome" => "denied").increment(1);
            counter!("shield_denials_total", "reason" => violation.label()).increment(1);
        }
    }
}

pub fn record_route_throttled(route: &str, check: &str) {
    counter!(
        "shield_route_throttled_total",
        "route" => route.to_string(),
        "check" => check.to_string()
    )
    .increment(1);
}

pub fn record_active_bans(count: usize) {
    gauge!("shield_active_bans").set(count as f64);
}

pub fn record_rule_reload(ok: bool) {
    let result = if ok { "success" } else { "failure" };
    counter!("shield_rule_reloads_total", "result" => result).increment(1);
}
