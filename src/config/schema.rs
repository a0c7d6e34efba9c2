//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the request shield.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// The application server that admitted requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Inspection rules, rate limits and ban policy.
    pub waf: WafConfig,

    /// Per-route throttles stacked on top of the global limiter.
    pub route_guards: Vec<RouteGuardConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Read-only admin API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream application server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Web application firewall configuration.
///
/// Compiled into a [`RuleSet`](crate::security::rules::RuleSet) at startup
/// and on every reload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WafConfig {
    /// When false, every request is admitted and no headers are added.
    pub enabled: bool,

    /// Cross-site scripting payload patterns.
    pub xss_patterns: Vec<String>,

    /// SQL injection payload patterns.
    pub sql_patterns: Vec<String>,

    /// Path traversal patterns, matched against the raw request path.
    pub path_patterns: Vec<String>,

    /// User-Agent patterns of scanners and other unwanted clients.
    pub blocked_identifiers: Vec<String>,

    /// Accepted HTTP methods.
    pub allowed_methods: Vec<String>,

    /// Maximum length of the request URL (path and query).
    pub max_url_length: usize,

    /// Maximum request body size in bytes.
    pub max_body_size: u64,

    /// Path prefix reserved for administrative endpoints.
    pub admin_prefix: String,

    /// Client IPs allowed under `admin_prefix`. Empty means unrestricted.
    pub admin_whitelist: Vec<String>,

    /// Take the client IP from the first `X-Forwarded-For` entry.
    pub trust_forwarded_for: bool,

    /// Interval of the background expiry sweep, in seconds.
    pub sweep_interval_secs: u64,

    /// Sliding window limits and ban duration.
    pub rate_limit: RateLimitConfig,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            xss_patterns: to_strings(DEFAULT_XSS_PATTERNS),
            sql_patterns: to_strings(DEFAULT_SQL_PATTERNS),
            path_patterns: to_strings(DEFAULT_PATH_PATTERNS),
            blocked_identifiers: to_strings(DEFAULT_BLOCKED_IDENTIFIERS),
            allowed_methods: to_strings(&["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]),
            max_url_length: 2048,
            max_body_size: 10 * 1024 * 1024, // 10MB
            admin_prefix: "/admin".to_string(),
            admin_whitelist: Vec::new(),
            trust_forwarded_for: false,
            sweep_interval_secs: 60,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Sliding window rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window before the client is banned.
    pub requests: u32,

    /// Window length in seconds.
    pub per_seconds: u64,

    /// Ban length in seconds.
    pub block_duration: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            per_seconds: 60,
            block_duration: 300,
        }
    }
}

/// Throttle attached to a single route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteGuardConfig {
    /// Route path, registered verbatim with the router.
    pub path: String,

    /// Minimum time between two calls from the same client, in milliseconds.
    #[serde(default)]
    pub min_interval_ms: u64,

    /// Calls allowed per client per minute. Zero disables the counter.
    #[serde(default)]
    pub max_per_minute: u32,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

pub const DEFAULT_XSS_PATTERNS: &[&str] = &[
    r"<\s*script[^>]*>",
    r"<\s*/\s*script\s*>",
    r"javascript\s*:",
    r"vbscript\s*:",
    r"\bon[a-z]+\s*=",
    r"<\s*iframe",
    r"<\s*object",
    r"<\s*embed",
    r"<\s*svg[^>]*\bon",
    r"document\.cookie",
    r"eval\s*\(",
    r"expression\s*\(",
];

pub const DEFAULT_SQL_PATTERNS: &[&str] = &[
    r"\bunion\s+(all\s+)?select\b",
    r"\bselect\s+.{1,100}?\s+from\b",
    r"\binsert\s+into\b",
    r"\bdelete\s+from\b",
    r"\bdrop\s+(table|database|schema)\b",
    r"\btruncate\s+table\b",
    r"\bupdate\s+\w+\s+set\b",
    r"'\s*or\s+'?\d+'?\s*=\s*'?\d+",
    r"'\s*or\s+'[^']*'\s*=\s*'",
    r"'\s*;",
    r"'\s*--",
    r"/\*.*?\*/",
    r"\bxp_cmdshell\b",
    r"\b(sleep|benchmark|pg_sleep)\s*\(",
    r"\bwaitfor\s+delay\b",
];

pub const DEFAULT_PATH_PATTERNS: &[&str] = &[
    r"\.\./",
    r"\.\.\\",
    r"%2e%2e",
    r"%252e%252e",
    r"\.\.%2f",
    r"\.\.%5c",
    r"%00",
    r"/etc/passwd",
    r"/proc/self",
    r"c:\\windows",
];

pub const DEFAULT_BLOCKED_IDENTIFIERS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "zgrab",
    "dirbuster",
    "gobuster",
    "wpscan",
    "acunetix",
    "nessus",
    "havij",
    "w3af",
];

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
