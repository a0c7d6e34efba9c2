//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, addresses parse)
//! - Detect duplicate route guards
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Pattern compilation is left to `RuleSet::load`, which reports the
//!   offending pattern precisely

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::schema::ShieldConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_socket_addr(&mut errors, "upstream.address", &config.upstream.address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be positive"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive"));
    }

    let waf = &config.waf;
    if waf.max_url_length == 0 {
        errors.push(ValidationError::new("waf.max_url_length", "must be positive"));
    }
    if waf.max_body_size == 0 {
        errors.push(ValidationError::new("waf.max_body_size", "must be positive"));
    }
    if waf.rate_limit.requests == 0 {
        errors.push(ValidationError::new("waf.rate_limit.requests", "must be positive"));
    }
    if waf.rate_limit.per_seconds == 0 {
        errors.push(ValidationError::new("waf.rate_limit.per_seconds", "must be positive"));
    }
    if waf.rate_limit.block_duration == 0 {
        errors.push(ValidationError::new("waf.rate_limit.block_duration", "must be positive"));
    }
    if waf.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("waf.sweep_interval_secs", "must be positive"));
    }
    if waf.allowed_methods.is_empty() {
        errors.push(ValidationError::new("waf.allowed_methods", "must not be empty"));
    }
    if !waf.admin_prefix.starts_with('/') {
        errors.push(ValidationError::new("waf.admin_prefix", "must start with '/'"));
    }
    for ip in &waf.admin_whitelist {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "waf.admin_whitelist",
                format!("'{}' is not an IP address", ip),
            ));
        }
    }

    let mut seen = HashSet::new();
    for (i, guard) in config.route_guards.iter().enumerate() {
        let field = format!("route_guards[{}]", i);
        if !guard.path.starts_with('/') {
            errors.push(ValidationError::new(format!("{}.path", field), "must start with '/'"));
        }
        if !seen.insert(guard.path.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.path", field),
                format!("duplicate guard for '{}'", guard.path),
            ));
        }
        if guard.min_interval_ms == 0 && guard.max_per_minute == 0 {
            errors.push(ValidationError::new(field, "guard has no limits configured"));
        }
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"pretty\" or \"json\"",
        ));
    }
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }
    if config.admin.enabled {
        check_socket_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", value),
        ));
    }
}
