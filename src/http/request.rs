//! Request extraction.
//!
//! # Responsibilities
//! - Resolve the client address (peer, or `X-Forwarded-For` when trusted)
//! - Turn request parts into an [`InspectRequest`]
//! - Classify bodies that need buffering for JSON scanning
//!
//! # Design Decisions
//! - Header values that are not valid UTF-8 are treated as absent
//! - The query is decoded with `form_urlencoded`; the path stays raw

use std::net::IpAddr;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::security::pipeline::{carries_body, InspectRequest};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The resolved client address, attached to requests that pass inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// The address the pipeline keys on.
///
/// With `trust_forwarded_for` the first parseable hop of `X-Forwarded-For`
/// wins; otherwise (or when the header is unusable) the socket peer is used.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer
}

/// True for `application/json` and `+json` media types.
pub fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Whether the body must be buffered and handed to the pipeline.
pub fn wants_json_body(parts: &Parts) -> bool {
    carries_body(&parts.method) && is_json(&parts.headers)
}

pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Everything but the body. The caller attaches a buffered JSON body.
/// A `None` client address makes inspection fail closed.
pub fn inspect_request(parts: &Parts, client_ip: Option<IpAddr>) -> InspectRequest {
    let uri = &parts.uri;
    let mut req = InspectRequest::unattributed(parts.method.clone(), uri.path());
    req.client_ip = client_ip;
    req.url_length = uri
        .path_and_query()
        .map(|pq| pq.as_str().len())
        .unwrap_or(req.url_length);
    req.user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    req.query = parse_query(uri.query());
    req.content_length = declared_length(&parts.headers);
    req
}
