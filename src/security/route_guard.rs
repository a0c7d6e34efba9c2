//! Per-route throttling stacked on top of global admission.
//!
//! A [`RouteGuard`] owns an ordered list of [`GuardCheck`]s and the throttle
//! state of every client that called its route. Checks run in order under
//! the client's entry lock; the first rejection wins and the handler never
//! runs.
//!
//! Built-in checks:
//! - [`MinInterval`]: minimum time between two calls from the same client
//! - [`PerMinuteCeiling`]: calls per client per minute bucket, counted in
//!   whole minutes since the guard was built
//!
//! Callers add route-specific logic with [`RouteGuardBuilder::predicate`] or
//! their own [`GuardCheck`] implementation.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;

use crate::config::RouteGuardConfig;
use crate::observability::metrics;

/// What a check sees about the current call.
#[derive(Debug)]
pub struct GuardContext<'a> {
    pub client_ip: IpAddr,
    pub route: &'a str,
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    /// Minute bucket the call falls into: whole minutes since the guard
    /// was built.
    pub minute: u64,
}

/// Result of one check.
#[derive(Debug)]
pub enum GuardOutcome {
    Continue,
    Reject(Response),
}

/// Throttle state of one (client, route) pair.
#[derive(Debug, Default)]
pub struct RouteThrottleState {
    last_request: Option<Instant>,
    last_seen: Option<Instant>,
    minute_counts: HashMap<u64, u32>,
}

/// One link in a guard's chain.
///
/// Checks run while the client's throttle entry is locked and must not block.
pub trait GuardCheck: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn check(
        &self,
        ctx: &GuardContext<'_>,
        state: &mut RouteThrottleState,
        now: Instant,
    ) -> GuardOutcome;
}

/// Rejects a call arriving sooner than `interval` after the client's
/// previous admitted call.
#[derive(Debug, Clone)]
pub struct MinInterval {
    interval: Duration,
}

impl MinInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl GuardCheck for MinInterval {
    fn name(&self) -> &str {
        "min_interval"
    }

    fn check(
        &self,
        _ctx: &GuardContext<'_>,
        state: &mut RouteThrottleState,
        now: Instant,
    ) -> GuardOutcome {
        if let Some(last) = state.last_request {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.interval {
                return GuardOutcome::Reject(too_many_requests(Some(self.interval - elapsed)));
            }
        }
        state.last_request = Some(now);
        GuardOutcome::Continue
    }
}

/// Rejects the call that takes a client's count for the current minute
/// above `max`.
#[derive(Debug, Clone)]
pub struct PerMinuteCeiling {
    max: u32,
}

impl PerMinuteCeiling {
    pub fn new(max: u32) -> Self {
        Self { max }
    }
}

impl GuardCheck for PerMinuteCeiling {
    fn name(&self) -> &str {
        "per_minute"
    }

    fn check(
        &self,
        ctx: &GuardContext<'_>,
        state: &mut RouteThrottleState,
        _now: Instant,
    ) -> GuardOutcome {
        let count = state.minute_counts.entry(ctx.minute).or_insert(0);
        *count = count.saturating_add(1);
        if *count > self.max {
            GuardOutcome::Reject(too_many_requests(None))
        } else {
            GuardOutcome::Continue
        }
    }
}

type PredicateFn = dyn Fn(&GuardContext<'_>) -> GuardOutcome + Send + Sync;

/// Caller-supplied check that only looks at the call itself.
pub struct Predicate {
    name: String,
    f: Box<PredicateFn>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate").field("name", &self.name).finish()
    }
}

impl GuardCheck for Predicate {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(
        &self,
        ctx: &GuardContext<'_>,
        _state: &mut RouteThrottleState,
        _now: Instant,
    ) -> GuardOutcome {
        (self.f)(ctx)
    }
}

/// Builds a [`RouteGuard`]; checks run in the order they are added.
pub struct RouteGuardBuilder {
    route: String,
    checks: Vec<Box<dyn GuardCheck>>,
    idle_ttl: Duration,
}

impl RouteGuardBuilder {
    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.idle_ttl = self.idle_ttl.max(interval);
        self.check(MinInterval::new(interval))
    }

    pub fn max_per_minute(self, max: u32) -> Self {
        self.check(PerMinuteCeiling::new(max))
    }

    pub fn predicate<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&GuardContext<'_>) -> GuardOutcome + Send + Sync + 'static,
    {
        self.check(Predicate {
            name: name.into(),
            f: Box::new(f),
        })
    }

    pub fn check(mut self, check: impl GuardCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn build(self) -> RouteGuard {
        RouteGuard {
            inner: Arc::new(RouteGuardInner {
                route: self.route,
                checks: self.checks,
                states: DashMap::new(),
                epoch: Instant::now(),
                idle_ttl: self.idle_ttl,
            }),
        }
    }
}

/// Throttle for one route. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RouteGuard {
    inner: Arc<RouteGuardInner>,
}

struct RouteGuardInner {
    route: String,
    checks: Vec<Box<dyn GuardCheck>>,
    states: DashMap<IpAddr, RouteThrottleState>,
    /// Origin of the minute buckets.
    epoch: Instant,
    /// How long an idle client's state is kept by the sweep.
    idle_ttl: Duration,
}

impl fmt::Debug for RouteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteGuard")
            .field("route", &self.inner.route)
            .field("checks", &self.inner.checks)
            .field("clients", &self.inner.states.len())
            .finish()
    }
}

impl RouteGuard {
    pub fn builder(route: impl Into<String>) -> RouteGuardBuilder {
        RouteGuardBuilder {
            route: route.into(),
            checks: Vec::new(),
            idle_ttl: Duration::from_secs(60),
        }
    }

    /// Guard with the built-in checks a config entry asks for: minimum
    /// interval first, then the per-minute ceiling.
    pub fn from_config(config: &RouteGuardConfig) -> Self {
        let mut builder = Self::builder(config.path.clone());
        if config.min_interval_ms > 0 {
            builder = builder.min_interval(Duration::from_millis(config.min_interval_ms));
        }
        if config.max_per_minute > 0 {
            builder = builder.max_per_minute(config.max_per_minute);
        }
        builder.build()
    }

    pub fn route(&self) -> &str {
        &self.inner.route
    }

    fn minute(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.inner.epoch).as_secs() / 60
    }

    /// Run the checks for one call.
    pub fn evaluate(
        &self,
        client_ip: IpAddr,
        method: &Method,
        headers: &HeaderMap,
        now: Instant,
    ) -> GuardOutcome {
        let ctx = GuardContext {
            client_ip,
            route: &self.inner.route,
            method,
            headers,
            minute: self.minute(now),
        };

        let mut state = self.inner.states.entry(client_ip).or_default();
        state.last_seen = Some(now);

        for check in &self.inner.checks {
            if let GuardOutcome::Reject(response) = check.check(&ctx, &mut state, now) {
                tracing::warn!(
                    client_ip = %client_ip,
                    route = %self.inner.route,
                    check = check.name(),
                    status = response.status().as_u16(),
                    "Route guard rejected request"
                );
                metrics::record_route_throttled(&self.inner.route, check.name());
                return GuardOutcome::Reject(response);
            }
        }

        GuardOutcome::Continue
    }

    /// Drop past minute buckets and clients idle longer than the guard
    /// needs to remember them. Returns the number of clients dropped.
    pub fn sweep(&self, now: Instant) -> usize {
        let minute = self.minute(now);
        let idle_ttl = self.inner.idle_ttl;
        let before = self.inner.states.len();

        self.inner.states.retain(|_, state| {
            state.minute_counts.retain(|bucket, _| *bucket >= minute);
            let idle = state
                .last_seen
                .map_or(true, |seen| now.saturating_duration_since(seen) >= idle_ttl);
            !(idle && state.minute_counts.is_empty())
        });

        before.saturating_sub(self.inner.states.len())
    }

    /// Number of clients with throttle state.
    pub fn tracked_clients(&self) -> usize {
        self.inner.states.len()
    }
}

fn too_many_requests(retry_after: Option<Duration>) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, "Too Many Requests").into_response();
    if let Some(wait) = retry_after {
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
    }
    response
}
