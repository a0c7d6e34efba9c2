use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AdminState;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub enabled: bool,
    pub uptime_secs: u64,
    pub active_bans: usize,
    pub tracked_clients: usize,
    pub route_guards: Vec<RouteGuardStatus>,
}

#[derive(Debug, Serialize)]
pub struct RouteGuardStatus {
    pub route: String,
    pub tracked_clients: usize,
}

#[derive(Debug, Serialize)]
pub struct RulesSummary {
    pub enabled: bool,
    pub allowed_methods: Vec<String>,
    pub max_url_length: usize,
    pub max_body_size: u64,
    pub admin_prefix: String,
    pub admin_whitelist: Vec<String>,
    pub trust_forwarded_for: bool,
    pub rate_limit: RateLimitSummary,
    pub pattern_counts: PatternCounts,
}

#[derive(Debug, Serialize)]
pub struct RateLimitSummary {
    pub max_requests: usize,
    pub window_secs: u64,
    pub ban_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct PatternCounts {
    pub xss: usize,
    pub sql_injection: usize,
    pub path_traversal: usize,
    pub blocked_identifiers: usize,
}

#[derive(Debug, Serialize)]
pub struct BanEntry {
    pub client_ip: String,
    pub remaining_secs: u64,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let shield = &state.shield;
    let mut route_guards: Vec<_> = shield
        .route_guards()
        .into_iter()
        .map(|guard| RouteGuardStatus {
            route: guard.route().to_string(),
            tracked_clients: guard.tracked_clients(),
        })
        .collect();
    route_guards.sort_by(|a, b| a.route.cmp(&b.route));

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        enabled: shield.rules().enabled(),
        uptime_secs: state.started.elapsed().as_secs(),
        active_bans: shield.ledger().active_bans(Instant::now()).len(),
        tracked_clients: shield.ledger().tracked_clients(),
        route_guards,
    })
}

pub async fn get_rules(State(state): State<AdminState>) -> Json<RulesSummary> {
    let rules = state.shield.rules();
    let mut admin_whitelist: Vec<_> = rules
        .admin_whitelist()
        .iter()
        .map(|ip| ip.to_string())
        .collect();
    admin_whitelist.sort();
    let policy = rules.rate_limit();

    Json(RulesSummary {
        enabled: rules.enabled(),
        allowed_methods: rules
            .allowed_methods()
            .iter()
            .map(|m| m.to_string())
            .collect(),
        max_url_length: rules.max_url_length(),
        max_body_size: rules.max_body_size(),
        admin_prefix: rules.admin_prefix().to_string(),
        admin_whitelist,
        trust_forwarded_for: rules.trust_forwarded_for(),
        rate_limit: RateLimitSummary {
            max_requests: policy.max_requests,
            window_secs: policy.window.as_secs(),
            ban_secs: policy.ban.as_secs(),
        },
        pattern_counts: PatternCounts {
            xss: rules.xss().len(),
            sql_injection: rules.sql().len(),
            path_traversal: rules.path_traversal().len(),
            blocked_identifiers: rules.blocked_identifiers().len(),
        },
    })
}

pub async fn get_bans(State(state): State<AdminState>) -> Json<Vec<BanEntry>> {
    let bans = state
        .shield
        .ledger()
        .active_bans(Instant::now())
        .into_iter()
        .map(|(ip, remaining)| BanEntry {
            client_ip: ip.to_string(),
            remaining_secs: remaining.as_secs(),
        })
        .collect();
    Json(bans)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::admin::{admin_router, AdminState};
    use crate::config::WafConfig;
    use crate::security::rules::RateLimitPolicy;
    use crate::security::Shield;

    fn state() -> AdminState {
        let shield = Arc::new(Shield::new(&WafConfig::default()).unwrap());
        AdminState::new(shield, "test-key")
    }

    async fn get_json(state: AdminState, path: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {key}"));
        }
        let response = admin_router(state)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let (status, _) = get_json(state(), "/admin/status", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = get_json(state(), "/admin/status", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status() {
        let (status, json) = get_json(state(), "/admin/status", Some("test-key")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["enabled"], true);
        assert_eq!(json["active_bans"], 0);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_rules_summary() {
        let (status, json) = get_json(state(), "/admin/rules", Some("test-key")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rate_limit"]["max_requests"], 100);
        assert_eq!(json["rate_limit"]["window_secs"], 60);
        assert_eq!(json["rate_limit"]["ban_secs"], 300);
        assert_eq!(json["max_url_length"], 2048);
        assert!(json["pattern_counts"]["xss"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_bans_lists_active_ban() {
        let state = state();
        let policy = RateLimitPolicy {
            max_requests: 0,
            window: std::time::Duration::from_secs(60),
            ban: std::time::Duration::from_secs(300),
        };
        let ip = "203.0.113.9".parse().unwrap();
        state
            .shield
            .ledger()
            .record_and_check(ip, std::time::Instant::now(), &policy);

        let (status, json) = get_json(state, "/admin/bans", Some("test-key")).await;
        assert_eq!(status, StatusCode::OK);
        let bans = json.as_array().unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0]["client_ip"], "203.0.113.9");
        assert!(bans[0]["remaining_secs"].as_u64().unwrap() <= 300);
    }
}
