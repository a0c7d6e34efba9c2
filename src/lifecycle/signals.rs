//! OS signal handling.
//!
//! - SIGINT / SIGTERM trigger graceful shutdown
//! - SIGHUP re-reads the config file (rules only, never shutdown)

use tokio::signal;

use crate::config::watcher::Reloader;
use crate::lifecycle::Shutdown;

/// Run until a shutdown signal arrives, then trigger `shutdown`.
pub async fn listen_for_signals(shutdown: Shutdown, reloader: Option<Reloader>) {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let mut term = match unix_signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };
        let mut hup = match unix_signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("SIGINT received");
                    break;
                }
                _ = term.recv() => {
                    tracing::info!("SIGTERM received");
                    break;
                }
                _ = hup.recv() => {
                    tracing::info!("SIGHUP received, reloading configuration");
                    match &reloader {
                        Some(reloader) => reloader.reload(),
                        None => tracing::warn!("No config file to reload"),
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = reloader;
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        tracing::info!("Ctrl+C received");
    }

    shutdown.trigger();
}
