//! Compiled detection rules and thresholds.
//!
//! # Responsibilities
//! - Compile configured patterns once, at load time
//! - Validate thresholds (all must be positive)
//! - Expose read-only accessors to the inspection pipeline
//!
//! # Design Decisions
//! - `regex` only: matching is linear in the input, so attacker-controlled
//!   payloads cannot trigger catastrophic backtracking
//! - Patterns are compiled case-insensitive; the pipeline also lower-cases
//!   the haystack, so `<SCRIPT>` and `<script>` are the same payload
//! - A RuleSet is never mutated; reconfiguration builds a new one

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use axum::http::Method;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::config::WafConfig;

/// Compiled program size cap per pattern.
const PATTERN_SIZE_LIMIT: usize = 2 * 1024 * 1024;

/// Errors raised while building a [`RuleSet`]. Fatal at startup; on reload
/// the previous rule set stays active.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid {category} pattern '{pattern}': {source}")]
    InvalidPattern {
        category: RuleCategory,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid admin whitelist address '{0}'")]
    InvalidAddress(String),
}

/// Detection class a pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleCategory {
    Xss,
    SqlInjection,
    PathTraversal,
    BlockedIdentifier,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::Xss => "xss",
            RuleCategory::SqlInjection => "sql_injection",
            RuleCategory::PathTraversal => "path_traversal",
            RuleCategory::BlockedIdentifier => "blocked_identifier",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered list of compiled patterns of one category.
#[derive(Debug, Clone)]
pub struct PatternList {
    rules: Vec<Regex>,
}

impl PatternList {
    /// Compile `patterns` in order.
    pub fn compile(category: RuleCategory, patterns: &[String]) -> Result<Self, RuleError> {
        let rules = patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|source| RuleError::InvalidPattern {
                        category,
                        pattern: pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// The first pattern (in configured order) that matches, as its source text.
    pub fn first_match(&self, haystack: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|re| re.is_match(haystack))
            .map(|re| re.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Sliding window and ban parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Requests admitted per window; request `max_requests + 1` bans.
    pub max_requests: usize,
    pub window: Duration,
    pub ban: Duration,
}

/// Immutable, fully compiled inspection configuration.
#[derive(Debug, Clone)]
pub struct RuleSet {
    enabled: bool,
    xss: PatternList,
    sql: PatternList,
    path: PatternList,
    identifiers: PatternList,
    allowed_methods: Vec<Method>,
    max_url_length: usize,
    max_body_size: u64,
    admin_prefix: String,
    admin_whitelist: HashSet<IpAddr>,
    trust_forwarded_for: bool,
    sweep_interval: Duration,
    rate_limit: RateLimitPolicy,
}

impl RuleSet {
    /// Compile a rule set from configuration.
    pub fn load(config: &WafConfig) -> Result<Self, RuleError> {
        positive("max_url_length", config.max_url_length as u64)?;
        positive("max_body_size", config.max_body_size)?;
        positive("rate_limit.requests", config.rate_limit.requests as u64)?;
        positive("rate_limit.per_seconds", config.rate_limit.per_seconds)?;
        positive("rate_limit.block_duration", config.rate_limit.block_duration)?;
        positive("sweep_interval_secs", config.sweep_interval_secs)?;

        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| RuleError::InvalidMethod(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if allowed_methods.is_empty() {
            return Err(RuleError::NonPositive { field: "allowed_methods" });
        }

        let admin_whitelist = config
            .admin_whitelist
            .iter()
            .map(|ip| {
                ip.trim()
                    .parse::<IpAddr>()
                    .map_err(|_| RuleError::InvalidAddress(ip.clone()))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(Self {
            enabled: config.enabled,
            xss: PatternList::compile(RuleCategory::Xss, &config.xss_patterns)?,
            sql: PatternList::compile(RuleCategory::SqlInjection, &config.sql_patterns)?,
            path: PatternList::compile(RuleCategory::PathTraversal, &config.path_patterns)?,
            identifiers: PatternList::compile(
                RuleCategory::BlockedIdentifier,
                &config.blocked_identifiers,
            )?,
            allowed_methods,
            max_url_length: config.max_url_length,
            max_body_size: config.max_body_size,
            admin_prefix: config.admin_prefix.clone(),
            admin_whitelist,
            trust_forwarded_for: config.trust_forwarded_for,
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            rate_limit: RateLimitPolicy {
                max_requests: config.rate_limit.requests as usize,
                window: Duration::from_secs(config.rate_limit.per_seconds),
                ban: Duration::from_secs(config.rate_limit.block_duration),
            },
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn xss(&self) -> &PatternList {
        &self.xss
    }

    pub fn sql(&self) -> &PatternList {
        &self.sql
    }

    pub fn path_traversal(&self) -> &PatternList {
        &self.path
    }

    pub fn blocked_identifiers(&self) -> &PatternList {
        &self.identifiers
    }

    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed_methods
    }

    pub fn is_method_allowed(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    pub fn max_url_length(&self) -> usize {
        self.max_url_length
    }

    pub fn max_body_size(&self) -> u64 {
        self.max_body_size
    }

    pub fn admin_prefix(&self) -> &str {
        &self.admin_prefix
    }

    pub fn admin_whitelist(&self) -> &HashSet<IpAddr> {
        &self.admin_whitelist
    }

    /// Whether `path` lies under the admin prefix. Matches whole segments
    /// only: `/admin` covers `/admin` and `/admin/users`, not `/administrator`.
    pub fn is_admin_path(&self, path: &str) -> bool {
        let prefix = self.admin_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn rate_limit(&self) -> &RateLimitPolicy {
        &self.rate_limit
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), RuleError> {
    if value == 0 {
        Err(RuleError::NonPositive { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_compile() {
        let rules = RuleSet::load(&WafConfig::default()).unwrap();
        assert!(rules.enabled());
        assert!(!rules.xss().is_empty());
        assert!(!rules.sql().is_empty());
        assert!(rules.is_method_allowed(&Method::GET));
        assert!(!rules.is_method_allowed(&Method::TRACE));
        assert_eq!(rules.rate_limit().max_requests, 100);
        assert_eq!(rules.rate_limit().ban, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_pattern_names_category_and_pattern() {
        let mut config = WafConfig::default();
        config.sql_patterns.push("(unclosed".into());

        let err = RuleSet::load(&config).unwrap_err();
        match &err {
            RuleError::InvalidPattern { category, pattern, .. } => {
                assert_eq!(*category, RuleCategory::SqlInjection);
                assert_eq!(pattern, "(unclosed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_positive_thresholds_rejected() {
        let mut config = WafConfig::default();
        config.rate_limit.per_seconds = 0;
        assert!(matches!(
            RuleSet::load(&config),
            Err(RuleError::NonPositive { field: "rate_limit.per_seconds" })
        ));

        let mut config = WafConfig::default();
        config.max_body_size = 0;
        assert!(matches!(
            RuleSet::load(&config),
            Err(RuleError::NonPositive { field: "max_body_size" })
        ));
    }

    #[test]
    fn test_methods_are_normalized() {
        let mut config = WafConfig::default();
        config.allowed_methods = vec!["get".into(), " post ".into()];
        let rules = RuleSet::load(&config).unwrap();
        assert_eq!(rules.allowed_methods(), &[Method::GET, Method::POST]);
    }

    #[test]
    fn test_admin_prefix_matches_whole_segments() {
        let rules = RuleSet::load(&WafConfig::default()).unwrap();
        assert!(rules.is_admin_path("/admin"));
        assert!(rules.is_admin_path("/admin/"));
        assert!(rules.is_admin_path("/admin/users/7"));
        assert!(!rules.is_admin_path("/administrator"));
        assert!(!rules.is_admin_path("/admins/list"));
        assert!(!rules.is_admin_path("/public/admin"));

        let mut config = WafConfig::default();
        config.admin_prefix = "/internal/".into();
        let rules = RuleSet::load(&config).unwrap();
        assert!(rules.is_admin_path("/internal"));
        assert!(rules.is_admin_path("/internal/metrics"));
        assert!(!rules.is_admin_path("/internals"));
    }

    #[test]
    fn test_bad_whitelist_entry_rejected() {
        let mut config = WafConfig::default();
        config.admin_whitelist = vec!["not-an-ip".into()];
        assert!(matches!(RuleSet::load(&config), Err(RuleError::InvalidAddress(_))));
    }

    #[test]
    fn test_matching_is_case_insensitive_and_ordered() {
        let list = PatternList::compile(
            RuleCategory::Xss,
            &[r"<script".to_string(), r"script".to_string()],
        )
        .unwrap();

        assert_eq!(list.first_match("<SCRIPT>alert(1)</SCRIPT>"), Some("<script"));
        assert_eq!(list.first_match("<script>"), Some("<script"));
        assert_eq!(list.first_match("javascript"), Some("script"));
        assert_eq!(list.first_match("hello"), None);
    }
}
