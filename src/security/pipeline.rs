//! Ordered request inspection.
//!
//! # Stages
//! ```text
//!  1. URL length              → 414
//!  2. active ban              → 429
//!  3. sliding window          → 429 (and ban)
//!  4. method allow-list       → 405
//!  5. client identifier       → 403 (missing or blocked)
//!  6. admin prefix allow-list → 403
//!  7. path traversal          → 403
//!  8. query XSS, then SQLi    → 403
//!  9. declared body size      → 413
//! 10. JSON body parse + scan  → 400 / 403
//! ```
//!
//! The first failing stage decides; later stages never run. Nothing is
//! cached between requests.
//!
//! Stages 1-8 need only the request head ([`evaluate_head`]); 9-10 need the
//! buffered body ([`evaluate_body`]). A web layer runs the head stages
//! before reading any body bytes, so a banned or malformed request is
//! rejected without buffering.
//!
//! Query and body are scanned as one lower-cased JSON string, so a payload
//! nested anywhere (including in a key) is caught. Benign text that happens
//! to match a pattern is flagged too; scanning stays coarse-grained.

use std::net::IpAddr;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{Method, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::security::rate_limit::{BanLedger, LimitReason};
use crate::security::rules::{PatternList, RuleSet};

/// Unexpected failure while inspecting. Never shown to the client; the
/// request is denied instead.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to serialize payload for scanning: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("client address unavailable")]
    MissingClientAddress,
}

/// The policy a denied request violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Violation {
    UrlTooLong,
    Banned,
    RateLimited,
    MethodNotAllowed,
    MissingIdentifier,
    BlockedIdentifier,
    AdminForbidden,
    PathTraversal,
    Xss,
    SqlInjection,
    BodyTooLarge,
    MalformedBody,
    InternalFault,
}

impl Violation {
    pub fn status(&self) -> StatusCode {
        match self {
            Violation::UrlTooLong => StatusCode::URI_TOO_LONG,
            Violation::Banned | Violation::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Violation::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Violation::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Violation::MalformedBody => StatusCode::BAD_REQUEST,
            Violation::MissingIdentifier
            | Violation::BlockedIdentifier
            | Violation::AdminForbidden
            | Violation::PathTraversal
            | Violation::Xss
            | Violation::SqlInjection
            | Violation::InternalFault => StatusCode::FORBIDDEN,
        }
    }

    /// Human-readable reason, for logs only.
    pub fn reason(&self) -> &'static str {
        match self {
            Violation::UrlTooLong => "url too long",
            Violation::Banned => "rate limit / ban active",
            Violation::RateLimited => "rate limit exceeded",
            Violation::MethodNotAllowed => "method not allowed",
            Violation::MissingIdentifier => "missing client identifier",
            Violation::BlockedIdentifier => "blocked client identifier",
            Violation::AdminForbidden => "admin access denied",
            Violation::PathTraversal => "path traversal",
            Violation::Xss => "xss",
            Violation::SqlInjection => "sql injection",
            Violation::BodyTooLarge => "body too large",
            Violation::MalformedBody => "malformed body",
            Violation::InternalFault => "internal fault",
        }
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Violation::UrlTooLong => "url_too_long",
            Violation::Banned => "banned",
            Violation::RateLimited => "rate_limited",
            Violation::MethodNotAllowed => "method_not_allowed",
            Violation::MissingIdentifier => "missing_identifier",
            Violation::BlockedIdentifier => "blocked_identifier",
            Violation::AdminForbidden => "admin_forbidden",
            Violation::PathTraversal => "path_traversal",
            Violation::Xss => "xss",
            Violation::SqlInjection => "sql_injection",
            Violation::BodyTooLarge => "body_too_large",
            Violation::MalformedBody => "malformed_body",
            Violation::InternalFault => "internal_fault",
        }
    }
}

/// The verdict for one request. Built fresh per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub status: StatusCode,
    pub violation: Option<Violation>,
    /// Source text of the pattern that matched, if a pattern decided.
    pub matched_rule: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            status: StatusCode::OK,
            violation: None,
            matched_rule: None,
        }
    }

    pub fn deny(violation: Violation) -> Self {
        Self {
            allow: false,
            status: violation.status(),
            violation: Some(violation),
            matched_rule: None,
        }
    }

    fn deny_matching(violation: Violation, rule: &str) -> Self {
        Self {
            matched_rule: Some(rule.to_string()),
            ..Self::deny(violation)
        }
    }

    pub fn reason(&self) -> &'static str {
        self.violation.map_or("allowed", |v| v.reason())
    }
}

/// Everything the pipeline looks at, extracted by the hosting web layer.
#[derive(Debug, Clone)]
pub struct InspectRequest {
    /// `None` when the web layer could not determine the client address;
    /// such a request fails closed.
    pub client_ip: Option<IpAddr>,
    pub method: Method,
    /// Raw (not percent-decoded) request path.
    pub path: String,
    /// Length of path plus query string.
    pub url_length: usize,
    /// The `User-Agent` header, when present and valid UTF-8.
    pub user_agent: Option<String>,
    /// Decoded query parameters, in request order.
    pub query: Vec<(String, String)>,
    /// Declared (or observed) body length.
    pub content_length: Option<u64>,
    /// Raw body of a JSON request.
    pub json_body: Option<Bytes>,
}

impl InspectRequest {
    pub fn new(client_ip: IpAddr, method: Method, path: impl Into<String>) -> Self {
        Self::unattributed(method, path).with_client_ip(client_ip)
    }

    /// A request whose client address is unknown.
    pub fn unattributed(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            client_ip: None,
            method,
            url_length: path.len(),
            path,
            user_agent: None,
            query: Vec::new(),
            content_length: None,
            json_body: None,
        }
    }

    pub fn with_client_ip(mut self, client_ip: IpAddr) -> Self {
        self.client_ip = Some(client_ip);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_json_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.content_length = Some(body.len() as u64);
        self.json_body = Some(body);
        self
    }

    pub fn with_content_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }
}

/// Methods whose body is subject to the size limit and JSON scanning.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Run every stage in order against one request.
pub fn evaluate(
    rules: &RuleSet,
    ledger: &BanLedger,
    req: &InspectRequest,
    now: Instant,
) -> Result<Decision, InspectError> {
    let decision = evaluate_head(rules, ledger, req, now)?;
    if !decision.allow {
        return Ok(decision);
    }
    evaluate_body(rules, req)
}

/// Stages 1-8. Records the request in the client's window.
pub fn evaluate_head(
    rules: &RuleSet,
    ledger: &BanLedger,
    req: &InspectRequest,
    now: Instant,
) -> Result<Decision, InspectError> {
    let client_ip = req.client_ip.ok_or(InspectError::MissingClientAddress)?;

    if req.url_length > rules.max_url_length() {
        return Ok(Decision::deny(Violation::UrlTooLong));
    }

    if ledger.is_banned(client_ip, now) {
        return Ok(Decision::deny(Violation::Banned));
    }

    let limit = ledger.record_and_check(client_ip, now, rules.rate_limit());
    if !limit.allowed {
        let violation = match limit.reason {
            Some(LimitReason::Banned) => Violation::Banned,
            _ => Violation::RateLimited,
        };
        return Ok(Decision::deny(violation));
    }

    if !rules.is_method_allowed(&req.method) {
        return Ok(Decision::deny(Violation::MethodNotAllowed));
    }

    let user_agent = match req.user_agent.as_deref().map(str::trim) {
        Some(ua) if !ua.is_empty() => ua.to_lowercase(),
        _ => return Ok(Decision::deny(Violation::MissingIdentifier)),
    };
    if let Some(rule) = rules.blocked_identifiers().first_match(&user_agent) {
        return Ok(Decision::deny_matching(Violation::BlockedIdentifier, rule));
    }

    if rules.is_admin_path(&req.path)
        && !rules.admin_whitelist().is_empty()
        && !rules.admin_whitelist().contains(&client_ip)
    {
        return Ok(Decision::deny(Violation::AdminForbidden));
    }

    if let Some(rule) = rules.path_traversal().first_match(&req.path.to_lowercase()) {
        return Ok(Decision::deny_matching(Violation::PathTraversal, rule));
    }

    if !req.query.is_empty() {
        let serialized = serialize_query(&req.query)?;
        if let Some(decision) = scan_payload(rules, &serialized) {
            return Ok(decision);
        }
    }

    Ok(Decision::allow())
}

/// Stages 9-10: declared size, then the JSON body if one was captured.
pub fn evaluate_body(rules: &RuleSet, req: &InspectRequest) -> Result<Decision, InspectError> {
    if carries_body(&req.method)
        && req.content_length.is_some_and(|len| len > rules.max_body_size())
    {
        return Ok(Decision::deny(Violation::BodyTooLarge));
    }

    if let Some(body) = &req.json_body {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(_) => return Ok(Decision::deny(Violation::MalformedBody)),
        };
        let serialized = serde_json::to_string(&value)?.to_lowercase();
        if let Some(decision) = scan_payload(rules, &serialized) {
            return Ok(decision);
        }
    }

    Ok(Decision::allow())
}

/// Emit the one structured record every denial gets.
pub fn log_denial(req: &InspectRequest, decision: &Decision) {
    tracing::warn!(
        client_ip = %display_ip(req),
        category = decision.reason(),
        status = decision.status.as_u16(),
        method = %req.method,
        path = %req.path,
        user_agent = req.user_agent.as_deref().unwrap_or("-"),
        matched_rule = decision.matched_rule.as_deref().unwrap_or("-"),
        "Request denied"
    );
}

/// The client address for log records, `-` when unknown.
pub(crate) fn display_ip(req: &InspectRequest) -> String {
    req.client_ip.map_or_else(|| "-".to_string(), |ip| ip.to_string())
}

/// Query parameters as a lower-cased JSON object. A repeated key becomes an
/// array so no value escapes scanning.
fn serialize_query(query: &[(String, String)]) -> Result<String, InspectError> {
    let mut map = Map::new();
    for (key, value) in query {
        match map.get_mut(key) {
            None => {
                map.insert(key.clone(), Value::String(value.clone()));
            }
            Some(Value::Array(values)) => values.push(Value::String(value.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.clone())]);
            }
        }
    }
    Ok(serde_json::to_string(&map)?.to_lowercase())
}

fn scan_payload(rules: &RuleSet, payload: &str) -> Option<Decision> {
    scan_with(rules.xss(), Violation::Xss, payload)
        .or_else(|| scan_with(rules.sql(), Violation::SqlInjection, payload))
}

fn scan_with(patterns: &PatternList, violation: Violation, payload: &str) -> Option<Decision> {
    patterns
        .first_match(payload)
        .map(|rule| Decision::deny_matching(violation, rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WafConfig;
    use std::time::Duration;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

    fn rules() -> RuleSet {
        RuleSet::load(&WafConfig::default()).unwrap()
    }

    fn rules_with(f: impl FnOnce(&mut WafConfig)) -> RuleSet {
        let mut config = WafConfig::default();
        f(&mut config);
        RuleSet::load(&config).unwrap()
    }

    fn client() -> IpAddr {
        "203.0.113.5".parse().unwrap()
    }

    fn get(path: &str) -> InspectRequest {
        InspectRequest::new(client(), Method::GET, path).with_user_agent(BROWSER)
    }

    fn run(rules: &RuleSet, req: &InspectRequest) -> Decision {
        evaluate(rules, &BanLedger::new(), req, Instant::now()).unwrap()
    }

    #[test]
    fn test_clean_request_is_allowed() {
        let req = get("/search").with_query("q", "rust async runtimes");
        assert_eq!(run(&rules(), &req), Decision::allow());
    }

    #[test]
    fn test_url_length_limit() {
        let rules = rules_with(|c| c.max_url_length = 16);
        let mut req = get("/a/very/long/path/indeed");
        assert_eq!(run(&rules, &req).status, StatusCode::URI_TOO_LONG);

        req.url_length = 16;
        assert!(run(&rules, &req).allow);
    }

    #[test]
    fn test_method_checked_before_xss() {
        let req = InspectRequest::new(client(), Method::TRACE, "/search")
            .with_user_agent(BROWSER)
            .with_query("q", "<script>alert(1)</script>");
        let decision = run(&rules(), &req);
        assert_eq!(decision.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(decision.violation, Some(Violation::MethodNotAllowed));
    }

    #[test]
    fn test_missing_or_blank_identifier_denied() {
        let req = InspectRequest::new(client(), Method::GET, "/");
        assert_eq!(run(&rules(), &req).violation, Some(Violation::MissingIdentifier));

        let req = InspectRequest::new(client(), Method::GET, "/").with_user_agent("   ");
        assert_eq!(run(&rules(), &req).violation, Some(Violation::MissingIdentifier));
    }

    #[test]
    fn test_scanner_identifier_blocked() {
        let req = InspectRequest::new(client(), Method::GET, "/")
            .with_user_agent("sqlmap/1.7.2#stable (https://sqlmap.org)");
        let decision = run(&rules(), &req);
        assert_eq!(decision.status, StatusCode::FORBIDDEN);
        assert_eq!(decision.violation, Some(Violation::BlockedIdentifier));
        assert_eq!(decision.matched_rule.as_deref(), Some("sqlmap"));
    }

    #[test]
    fn test_admin_whitelist() {
        let rules = rules_with(|c| c.admin_whitelist = vec!["10.0.0.1".into()]);

        let decision = run(&rules, &get("/admin/panel"));
        assert_eq!(decision.violation, Some(Violation::AdminForbidden));

        let mut req = get("/admin/panel");
        req.client_ip = Some("10.0.0.1".parse().unwrap());
        assert!(run(&rules, &req).allow);

        // Whitelisted IP still goes through the later stages.
        let req = req.with_query("q", "<script>");
        assert_eq!(run(&rules, &req).violation, Some(Violation::Xss));
    }

    #[test]
    fn test_admin_whitelist_ignores_lookalike_paths() {
        let rules = rules_with(|c| c.admin_whitelist = vec!["10.0.0.1".into()]);

        assert!(run(&rules, &get("/administrator")).allow);
        assert!(run(&rules, &get("/admin-guide/intro")).allow);
        assert_eq!(
            run(&rules, &get("/admin")).violation,
            Some(Violation::AdminForbidden)
        );
    }

    #[test]
    fn test_unknown_client_address_is_an_error() {
        let req = InspectRequest::unattributed(Method::GET, "/").with_user_agent(BROWSER);
        let result = evaluate(&rules(), &BanLedger::new(), &req, Instant::now());
        assert!(matches!(result, Err(InspectError::MissingClientAddress)));
    }

    #[test]
    fn test_head_stages_ignore_body() {
        let rules = rules_with(|c| c.max_body_size = 8);
        let ledger = BanLedger::new();
        let req = InspectRequest::new(client(), Method::POST, "/api")
            .with_user_agent(BROWSER)
            .with_json_body(r#"{"q":"<script>alert(1)</script>"}"#);

        assert!(evaluate_head(&rules, &ledger, &req, Instant::now()).unwrap().allow);
        assert_eq!(
            evaluate_body(&rules, &req).unwrap().violation,
            Some(Violation::BodyTooLarge)
        );
    }

    #[test]
    fn test_empty_admin_whitelist_is_unrestricted() {
        assert!(run(&rules(), &get("/admin/panel")).allow);
    }

    #[test]
    fn test_path_traversal() {
        for path in ["/static/../../etc/passwd", "/files/%2E%2E/secret", "/a/..%2fb"] {
            let decision = run(&rules(), &get(path));
            assert_eq!(decision.violation, Some(Violation::PathTraversal), "{}", path);
        }
    }

    #[test]
    fn test_query_xss_is_case_insensitive() {
        let lower = run(&rules(), &get("/search").with_query("q", "<script>alert(1)</script>"));
        let upper = run(&rules(), &get("/search").with_query("q", "<SCRIPT>alert(1)</SCRIPT>"));
        assert_eq!(lower.violation, Some(Violation::Xss));
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_query_sqli() {
        let req = get("/items").with_query("id", "1 UNION SELECT password FROM users");
        let decision = run(&rules(), &req);
        assert_eq!(decision.violation, Some(Violation::SqlInjection));
        assert_eq!(decision.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_xss_wins_over_sqli() {
        let req = get("/x").with_query("q", "<script>' OR 1=1 --");
        assert_eq!(run(&rules(), &req).violation, Some(Violation::Xss));
    }

    #[test]
    fn test_repeated_query_key_scans_every_value() {
        let req = get("/search").with_query("q", "fine").with_query("q", "javascript:alert(1)");
        assert_eq!(run(&rules(), &req).violation, Some(Violation::Xss));
    }

    #[test]
    fn test_payload_in_query_key_is_flagged() {
        let req = get("/search").with_query("<script>", "1");
        assert_eq!(run(&rules(), &req).violation, Some(Violation::Xss));
    }

    #[test]
    fn test_declared_body_too_large() {
        let rules = rules_with(|c| c.max_body_size = 1024);
        let req = InspectRequest::new(client(), Method::POST, "/upload")
            .with_user_agent(BROWSER)
            .with_content_length(1025);
        assert_eq!(run(&rules, &req).status, StatusCode::PAYLOAD_TOO_LARGE);

        // GET bodies are not size-checked.
        let req = get("/upload").with_content_length(4096);
        assert!(run(&rules, &req).allow);
    }

    #[test]
    fn test_malformed_json_body() {
        let req = InspectRequest::new(client(), Method::POST, "/api")
            .with_user_agent(BROWSER)
            .with_json_body(&b"{\"name\": "[..]);
        let decision = run(&rules(), &req);
        assert_eq!(decision.status, StatusCode::BAD_REQUEST);
        assert_eq!(decision.violation, Some(Violation::MalformedBody));
    }

    #[test]
    fn test_json_body_sqli() {
        let req = InspectRequest::new(client(), Method::POST, "/users")
            .with_user_agent(BROWSER)
            .with_json_body(r#"{"name": "a'; DROP TABLE users;--"}"#);
        let decision = run(&rules(), &req);
        assert_eq!(decision.status, StatusCode::FORBIDDEN);
        assert_eq!(decision.violation, Some(Violation::SqlInjection));
        assert!(decision.matched_rule.is_some());
    }

    #[test]
    fn test_nested_json_payload_is_caught() {
        let req = InspectRequest::new(client(), Method::PUT, "/profile")
            .with_user_agent(BROWSER)
            .with_json_body(r#"{"profile": {"links": [{"href": "JavaScript:steal()"}]}}"#);
        assert_eq!(run(&rules(), &req).violation, Some(Violation::Xss));
    }

    #[test]
    fn test_benign_json_body_allowed() {
        let req = InspectRequest::new(client(), Method::POST, "/notes")
            .with_user_agent(BROWSER)
            .with_json_body(r#"{"title": "Groceries", "items": ["milk", "eggs"], "done": false}"#);
        assert!(run(&rules(), &req).allow);
    }

    #[test]
    fn test_rate_limit_stage_precedes_method_check() {
        let rules = rules_with(|c| c.rate_limit.requests = 2);
        let ledger = BanLedger::new();
        let now = Instant::now();
        let bad_method = InspectRequest::new(client(), Method::TRACE, "/").with_user_agent(BROWSER);

        for _ in 0..2 {
            let d = evaluate(&rules, &ledger, &bad_method, now).unwrap();
            assert_eq!(d.violation, Some(Violation::MethodNotAllowed));
        }
        let d = evaluate(&rules, &ledger, &bad_method, now).unwrap();
        assert_eq!(d.violation, Some(Violation::RateLimited));

        let d = evaluate(&rules, &ledger, &get("/"), now + Duration::from_secs(1)).unwrap();
        assert_eq!(d.violation, Some(Violation::Banned));
        assert_eq!(d.reason(), "rate limit / ban active");
        assert_eq!(d.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_url_length_checked_before_ban() {
        let rules = rules_with(|c| {
            c.rate_limit.requests = 1;
            c.max_url_length = 8;
        });
        let ledger = BanLedger::new();
        let now = Instant::now();
        evaluate(&rules, &ledger, &get("/"), now).unwrap();
        evaluate(&rules, &ledger, &get("/"), now).unwrap();

        let d = evaluate(&rules, &ledger, &get("/far/too/long"), now).unwrap();
        assert_eq!(d.status, StatusCode::URI_TOO_LONG);
    }
}
