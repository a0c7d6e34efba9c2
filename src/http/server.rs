//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: configured route guards, forwarding fallback
//! - Wire up middleware (tracing, concurrency cap, request ID, panic
//!   recovery, hardening, deadline, inspection)
//! - Forward admitted requests to the upstream application
//! - Run the sweeper and apply hot rule reloads while serving

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{StatusCode, Uri, Version};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::ShieldConfig;
use crate::http::middleware::{guard_route, protect_with_deadline};
use crate::http::response::status_response;
use crate::security::{RuleError, Shield, Sweeper};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error("invalid upstream address '{0}'")]
    Upstream(String),
}

/// Where admitted requests go.
#[derive(Clone)]
struct ForwardState {
    client: Client<HttpConnector, Body>,
    upstream: Authority,
}

pub struct ShieldServer {
    config: ShieldConfig,
    shield: Arc<Shield>,
    forward: ForwardState,
}

impl ShieldServer {
    pub fn new(config: ShieldConfig) -> Result<Self, ServerError> {
        let shield = Arc::new(Shield::new(&config.waf)?);
        Self::with_shield(config, shield)
    }

    /// Serve with an existing shield, e.g. one shared with the admin API.
    pub fn with_shield(config: ShieldConfig, shield: Arc<Shield>) -> Result<Self, ServerError> {
        let upstream = Authority::from_str(&config.upstream.address)
            .map_err(|_| ServerError::Upstream(config.upstream.address.clone()))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            config,
            shield,
            forward: ForwardState { client, upstream },
        })
    }

    pub fn shield(&self) -> Arc<Shield> {
        self.shield.clone()
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// The full application router. Registers the configured route guards
    /// with the shield as a side effect.
    pub fn router(&self) -> Router {
        let mut routes = Router::new();
        for guard_config in &self.config.route_guards {
            let guard = self.shield.route_guard(guard_config);
            routes = routes.route(&guard_config.path, guard_route(any(forward_handler), guard));
        }
        let routes = routes
            .fallback(forward_handler)
            .with_state(self.forward.clone());
        let deadline = Duration::from_secs(self.config.timeouts.request_secs);

        protect_with_deadline(routes, self.shield.clone(), deadline)
            .layer(CatchPanicLayer::new())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(GlobalConcurrencyLimitLayer::new(
                self.config.listener.max_connections,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` fires. Validated configs arriving on
    /// `config_updates` replace the WAF rules in place; listener, upstream
    /// and route guard changes need a restart.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ShieldConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.forward.upstream,
            route_guards = self.config.route_guards.len(),
            "Shield server starting"
        );

        tokio::spawn(Sweeper::new(self.shield.clone()).run(shutdown.resubscribe()));

        let shield = self.shield.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                // Failures are logged and counted by the shield.
                let _ = shield.reload(&config.waf);
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("Shield server stopped");
        Ok(())
    }
}

/// Forward an admitted request to the upstream unchanged.
async fn forward_handler(State(state): State<ForwardState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build upstream URI");
            return status_response(StatusCode::BAD_GATEWAY);
        }
    };
    parts.version = Version::HTTP_11;

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => response.map(Body::new),
        Err(e) => {
            tracing::error!(upstream = %state.upstream, error = %e, "Upstream request failed");
            status_response(StatusCode::BAD_GATEWAY)
        }
    }
}
