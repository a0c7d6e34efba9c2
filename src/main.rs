//! request-shield
//!
//! An inline request-defense layer in front of one upstream application.
//!
//! ```text
//!                 ┌───────────────────────── request-shield ─────────────────────────┐
//!   Client ──────▶│ trace → limit → request id → catch panic → harden → inspect ─┐   │
//!                 │                                                              │   │
//!                 │                   [route guard] → forward handler ◀──────────┘   │──▶ Upstream
//!                 │                                                                  │
//!                 │  Shield: RuleSet (hot swap) · BanLedger · route guards · sweeper │
//!                 └──────────────────────────────────────────────────────────────────┘
//!   Operator ────▶ admin API (read-only, bearer key)        Prometheus ──▶ metrics
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use request_shield::admin::{self, AdminState};
use request_shield::config::loader::load_config;
use request_shield::config::validation::validate_config;
use request_shield::config::watcher::ConfigWatcher;
use request_shield::config::ShieldConfig;
use request_shield::http::ShieldServer;
use request_shield::lifecycle::{listen_for_signals, Shutdown};
use request_shield::observability::{logging, metrics};
use request_shield::security::Shield;

#[derive(Parser)]
#[command(name = "request-shield", version)]
#[command(about = "Inline WAF, rate limiter and response hardener", long_about = None)]
struct Args {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "SHIELD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            let config = ShieldConfig::default();
            if let Err(errors) = validate_config(&config) {
                for e in &errors {
                    eprintln!("invalid default config: {e}");
                }
                return Err("default configuration is invalid".into());
            }
            config
        }
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-shield starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        waf_enabled = config.waf.enabled,
        route_guards = config.route_guards.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let shield = Arc::new(Shield::new(&config.waf)?);

    // Keep the notify handle alive for the life of the process.
    let (config_updates, _watch_handle, reloader) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            let reloader = watcher.reloader();
            let handle = match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, SIGHUP reload only");
                    None
                }
            };
            (updates, handle, Some(reloader))
        }
        None => {
            let (_tx, updates) = mpsc::unbounded_channel();
            (updates, None, None)
        }
    };

    tokio::spawn(listen_for_signals(shutdown.clone(), reloader));

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(shield.clone(), &config.admin.api_key);
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server_shutdown = shutdown.subscribe();
    let server = ShieldServer::with_shield(config, shield)?;
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
