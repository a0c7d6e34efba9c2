//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → waf section compiled into a RuleSet
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → RuleSet compiled and swapped atomically into the Shield
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the `waf` section is hot; listener/upstream changes need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::ShieldConfig;
pub use schema::ListenerConfig;
pub use schema::UpstreamConfig;
pub use schema::WafConfig;
pub use schema::RateLimitConfig;
pub use schema::RouteGuardConfig;
pub use schema::ObservabilityConfig;
pub use schema::AdminConfig;
