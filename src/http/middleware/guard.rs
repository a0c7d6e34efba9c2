use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::http::request::ClientIp;
use crate::http::response::status_response;
use crate::security::{GuardOutcome, RouteGuard};

pub async fn route_guard_middleware(
    State(guard): State<RouteGuard>,
    req: Request,
    next: Next,
) -> Response {
    let client_ip = req
        .extensions()
        .get::<ClientIp>()
        .map(|ClientIp(ip)| *ip)
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        });

    let Some(client_ip) = client_ip else {
        tracing::error!(route = guard.route(), "Client address unavailable, denying request");
        return status_response(StatusCode::FORBIDDEN);
    };

    match guard.evaluate(client_ip, req.method(), req.headers(), Instant::now()) {
        GuardOutcome::Continue => next.run(req).await,
        GuardOutcome::Reject(response) => response,
    }
}
