//! one-core — shared types, deterministic environment naming, and
//! `one.toml` configuration.

pub mod config;
pub mod naming;
pub mod types;

pub use config::{CapacityLimits, ConfigError, OneConfig, RepositoryConfig};
pub use naming::{ENV_PREFIX, is_managed, job_name, namespace_name, rewrite_host};
pub use types::*;
