//! Sliding window rate limiting with temporary bans.
//!
//! # State Machine (per client IP)
//! ```text
//! Allowed → Banned:  window holds more than max_requests entries
//! Banned → Allowed:  now >= ban expiry (lazy on lookup, or by the sweeper)
//! ```
//!
//! # Locking
//! Both maps are `DashMap`s, so every operation on one key holds that key's
//! shard lock for its whole read-modify-write. When both maps are needed the
//! order is always windows → bans. The sweeper takes the same shard locks
//! through `retain`.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::security::rules::RateLimitPolicy;

/// Why the limiter refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    /// An unexpired ban was already in place.
    Banned,
    /// This request pushed the window over the limit and started a ban.
    WindowExceeded,
}

/// Outcome of [`BanLedger::record_and_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub reason: Option<LimitReason>,
}

impl RateLimitResult {
    fn allowed() -> Self {
        Self { allowed: true, reason: None }
    }

    fn denied(reason: LimitReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSweep {
    pub expired_bans: usize,
    pub dropped_windows: usize,
}

/// Per-client request windows and active bans.
#[derive(Debug, Default)]
pub struct BanLedger {
    windows: DashMap<IpAddr, VecDeque<Instant>>,
    bans: DashMap<IpAddr, Instant>,
}

impl BanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `ip` has a ban expiring after `now`. An expired ban found
    /// here is removed on the spot.
    pub fn is_banned(&self, ip: IpAddr, now: Instant) -> bool {
        if self.bans.remove_if(&ip, |_, expiry| now >= *expiry).is_some() {
            tracing::info!(client_ip = %ip, "Ban expired");
        }
        self.bans.get(&ip).is_some_and(|expiry| now < *expiry)
    }

    /// Record one request from `ip` at `now` and decide whether it is admitted.
    ///
    /// Banned clients are refused without touching their window. Otherwise
    /// the window is pruned to `policy.window`, `now` is appended, and a
    /// window longer than `policy.max_requests` bans the client until
    /// `now + policy.ban`.
    pub fn record_and_check(
        &self,
        ip: IpAddr,
        now: Instant,
        policy: &RateLimitPolicy,
    ) -> RateLimitResult {
        if self.is_banned(ip, now) {
            return RateLimitResult::denied(LimitReason::Banned);
        }

        let mut window = self.windows.entry(ip).or_default();

        // A concurrent request may have banned this client while we waited
        // for the shard lock.
        if self.bans.get(&ip).is_some_and(|expiry| now < *expiry) {
            return RateLimitResult::denied(LimitReason::Banned);
        }

        prune(&mut window, now, policy.window);
        window.push_back(now);

        if window.len() > policy.max_requests {
            let observed = window.len();
            window.clear();
            let expiry = now + policy.ban;
            self.bans.insert(ip, expiry);
            tracing::info!(
                client_ip = %ip,
                requests = observed,
                window_secs = policy.window.as_secs(),
                ban_secs = policy.ban.as_secs(),
                "Rate limit exceeded, client banned"
            );
            return RateLimitResult::denied(LimitReason::WindowExceeded);
        }

        RateLimitResult::allowed()
    }

    /// Drop expired bans and windows with no entries left inside `window`.
    pub fn sweep(&self, now: Instant, window: Duration) -> LedgerSweep {
        let bans_before = self.bans.len();
        self.bans.retain(|_, expiry| now < *expiry);

        let windows_before = self.windows.len();
        self.windows.retain(|_, entries| {
            prune(entries, now, window);
            !entries.is_empty()
        });

        LedgerSweep {
            expired_bans: bans_before.saturating_sub(self.bans.len()),
            dropped_windows: windows_before.saturating_sub(self.windows.len()),
        }
    }

    /// Active bans with their remaining duration, longest first.
    pub fn active_bans(&self, now: Instant) -> Vec<(IpAddr, Duration)> {
        let mut bans: Vec<_> = self
            .bans
            .iter()
            .filter(|entry| now < *entry.value())
            .map(|entry| (*entry.key(), entry.value().saturating_duration_since(now)))
            .collect();
        bans.sort_by(|a, b| b.1.cmp(&a.1));
        bans
    }

    /// Number of ban entries, including expired ones not yet swept.
    pub fn ban_count(&self) -> usize {
        self.bans.len()
    }

    /// Number of clients with a window in memory.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Remove timestamps at least `window` old. Does not assume ordering.
fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    entries.retain(|t| now.saturating_duration_since(*t) < window);
}
