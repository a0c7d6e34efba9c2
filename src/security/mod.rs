//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → pipeline.rs (ordered checks against the current RuleSet)
//!         → rate_limit.rs (sliding window, bans)
//!     → route_guard.rs (only on guarded routes, after global admission)
//!     → handler
//!     → headers.rs (defensive response headers)
//!
//! Background:
//!     sweeper.rs → expired bans, stale windows, stale route buckets
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: an internal fault denies the request
//! - No trust in client input
//! - All shared state hangs off one injectable `Shield`; no globals

pub mod headers;
pub mod pipeline;
pub mod rate_limit;
pub mod route_guard;
pub mod rules;
pub mod sweeper;

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::http::Response;
use dashmap::DashMap;

use crate::config::{RouteGuardConfig, WafConfig};
use crate::observability::metrics;

pub use headers::ResponseHardener;
pub use pipeline::{Decision, InspectRequest, Violation};
pub use rate_limit::BanLedger;
pub use route_guard::{GuardCheck, GuardContext, GuardOutcome, RouteGuard};
pub use rules::{RuleError, RuleSet};
pub use sweeper::Sweeper;

/// Totals from one [`Shield::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_bans: usize,
    pub dropped_windows: usize,
    pub dropped_route_clients: usize,
    pub active_bans: usize,
}

/// The request-defense pipeline for one server instance.
///
/// Holds the current [`RuleSet`] behind an `ArcSwap`, so a reload is seen
/// by in-flight inspections either entirely or not at all.
pub struct Shield {
    rules: ArcSwap<RuleSet>,
    ledger: BanLedger,
    hardener: ResponseHardener,
    guards: DashMap<String, RouteGuard>,
}

impl Shield {
    pub fn new(config: &WafConfig) -> Result<Self, RuleError> {
        Ok(Self::from_rules(RuleSet::load(config)?))
    }

    pub fn from_rules(rules: RuleSet) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            ledger: BanLedger::new(),
            hardener: ResponseHardener::new(),
            guards: DashMap::new(),
        }
    }

    /// Snapshot of the active rules.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    pub fn ledger(&self) -> &BanLedger {
        &self.ledger
    }

    /// Compile `config` and swap it in. On error the current rules stay.
    pub fn reload(&self, config: &WafConfig) -> Result<(), RuleError> {
        match RuleSet::load(config) {
            Ok(rules) => {
                self.rules.store(Arc::new(rules));
                metrics::record_rule_reload(true);
                tracing::info!(
                    xss = config.xss_patterns.len(),
                    sql = config.sql_patterns.len(),
                    path = config.path_patterns.len(),
                    identifiers = config.blocked_identifiers.len(),
                    "Rule set reloaded"
                );
                Ok(())
            }
            Err(e) => {
                metrics::record_rule_reload(false);
                tracing::error!(error = %e, "Rule set rejected, keeping current rules");
                Err(e)
            }
        }
    }

    /// Decide whether a request may proceed.
    pub fn inspect(&self, req: &InspectRequest) -> Decision {
        self.inspect_at(req, Instant::now())
    }

    /// [`inspect`](Self::inspect) with an explicit clock.
    pub fn inspect_at(&self, req: &InspectRequest, now: Instant) -> Decision {
        let rules = self.rules.load();
        self.conclude(&rules, req, true, |rules| {
            pipeline::evaluate(rules, &self.ledger, req, now)
        })
    }

    /// Stages 1-8 only, for a web layer that has not read the body yet.
    ///
    /// `rules` is the snapshot taken for this request; pass the same one to
    /// [`inspect_body`](Self::inspect_body).
    pub fn inspect_head(&self, rules: &RuleSet, req: &InspectRequest, now: Instant) -> Decision {
        self.conclude(rules, req, false, |rules| {
            pipeline::evaluate_head(rules, &self.ledger, req, now)
        })
    }

    /// Stages 9-10, once [`inspect_head`](Self::inspect_head) admitted the
    /// request and the body has been read.
    pub fn inspect_body(&self, rules: &RuleSet, req: &InspectRequest) -> Decision {
        self.conclude(rules, req, true, |rules| pipeline::evaluate_body(rules, req))
    }

    /// Fail closed on error, log every denial once, and count the outcome.
    /// An admission is only counted when no stage is left to run.
    fn conclude<F>(&self, rules: &RuleSet, req: &InspectRequest, last: bool, stages: F) -> Decision
    where
        F: FnOnce(&RuleSet) -> Result<Decision, pipeline::InspectError>,
    {
        if !rules.enabled() {
            return Decision::allow();
        }

        let started = Instant::now();
        let decision = match stages(rules) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(
                    client_ip = %pipeline::display_ip(req),
                    path = %req.path,
                    error = %e,
                    "Inspection failed, denying request"
                );
                Decision::deny(Violation::InternalFault)
            }
        };

        if !decision.allow {
            pipeline::log_denial(req, &decision);
        }
        if !decision.allow || last {
            metrics::record_inspection(&decision, started);
        }
        decision
    }

    /// Attach the defensive header bundle, unless the pipeline is disabled.
    pub fn decorate<B>(&self, response: Response<B>) -> Response<B> {
        if self.rules.load().enabled() {
            self.hardener.decorate(response)
        } else {
            response
        }
    }

    /// Build a guard from config and register it for sweeping.
    pub fn route_guard(&self, config: &RouteGuardConfig) -> RouteGuard {
        let guard = RouteGuard::from_config(config);
        self.register_route_guard(guard.clone());
        guard
    }

    /// Register a hand-built guard so the sweeper compacts its state.
    pub fn register_route_guard(&self, guard: RouteGuard) {
        self.guards.insert(guard.route().to_string(), guard);
    }

    pub fn route_guards(&self) -> Vec<RouteGuard> {
        self.guards.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Expire bans, drop stale windows and route buckets.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let window = self.rules.load().rate_limit().window;
        let ledger = self.ledger.sweep(now, window);
        let dropped_route_clients = self
            .guards
            .iter()
            .map(|entry| entry.value().sweep(now))
            .sum();
        let active_bans = self.ledger.ban_count();
        metrics::record_active_bans(active_bans);

        SweepReport {
            expired_bans: ledger.expired_bans,
            dropped_windows: ledger.dropped_windows,
            dropped_route_clients,
            active_bans,
        }
    }
}
