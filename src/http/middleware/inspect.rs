use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::http::request::{inspect_request, resolve_client_ip, wants_json_body, ClientIp};
use crate::http::response::deny_response;
use crate::security::{InspectRequest, Shield};

/// Run the inspection pipeline and either deny or pass the request on with
/// its [`ClientIp`] attached.
///
/// The head stages run before any body bytes are read. Only a request they
/// admit has its JSON body buffered for the body stages.
pub async fn inspect_middleware(
    State(shield): State<Arc<Shield>>,
    req: Request,
    next: Next,
) -> Response {
    let rules = shield.rules();
    if !rules.enabled() {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = resolve_client_ip(&parts.headers, peer, rules.trust_forwarded_for());

    let mut inspect = inspect_request(&parts, client_ip);
    let decision = shield.inspect_head(&rules, &inspect, Instant::now());
    if !decision.allow {
        return deny_response(&decision);
    }

    let max_body = rules.max_body_size();
    let body = if wants_json_body(&parts) && inspect.content_length.map_or(true, |len| len <= max_body) {
        buffer_json_body(body, &mut inspect, max_body).await
    } else {
        body
    };

    let decision = shield.inspect_body(&rules, &inspect);
    if !decision.allow {
        return deny_response(&decision);
    }

    if let Some(ip) = client_ip {
        parts.extensions.insert(ClientIp(ip));
    }
    next.run(Request::from_parts(parts, body)).await
}

/// Read at most `max_body` bytes into `inspect.json_body` and hand back a
/// replayable body for the handler.
async fn buffer_json_body(body: Body, inspect: &mut InspectRequest, max_body: u64) -> Body {
    let limit = usize::try_from(max_body).unwrap_or(usize::MAX);
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => {
            if !bytes.is_empty() {
                let observed = bytes.len() as u64;
                inspect.content_length =
                    Some(inspect.content_length.map_or(observed, |len| len.max(observed)));
                inspect.json_body = Some(bytes.clone());
            }
            Body::from(bytes)
        }
        Err(e) => {
            // Undeclared stream past the limit, or a broken read.
            tracing::debug!(path = %inspect.path, error = %e, "Body buffering failed");
            inspect.content_length = Some(max_body.saturating_add(1));
            Body::empty()
        }
    }
}

pub async fn harden_middleware(
    State(shield): State<Arc<Shield>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    shield.decorate(response)
}
