//! Periodic ledger compaction.
//!
//! # Responsibilities
//! - Expire bans and drop stale rate windows on a fixed cadence
//! - Compact per-route throttle buckets
//! - Publish the active-ban gauge

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::time;

use super::Shield;

pub struct Sweeper {
    shield: Arc<Shield>,
}

impl Sweeper {
    pub fn new(shield: Arc<Shield>) -> Self {
        Self { shield }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.shield.rules().sweep_interval().as_secs(),
            "Ledger sweeper starting"
        );

        loop {
            // Re-read each pass so a reload can change the cadence.
            let interval = self.shield.rules().sweep_interval();

            tokio::select! {
                _ = time::sleep(interval) => {
                    let report = self.shield.sweep(Instant::now());
                    tracing::debug!(
                        expired_bans = report.expired_bans,
                        dropped_windows = report.dropped_windows,
                        dropped_route_clients = report.dropped_route_clients,
                        active_bans = report.active_bans,
                        "Ledger sweep complete"
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Ledger sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
