//! redb table definitions for the cluster store.
//!
//! Each table uses `&str` keys and `&[u8]` values. Namespaced objects use
//! the composite key `{namespace}/{name}`.

use redb::TableDefinition;

/// Namespace summaries keyed by `{namespace}`.
pub const NAMESPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("namespaces");

/// Ingress rules keyed by `{namespace}/{rule}`.
pub const INGRESSES: TableDefinition<&str, &[u8]> = TableDefinition::new("ingresses");

/// Opaque config records keyed by `{namespace}/{key}`. Values are stored as-is.
pub const CONFIG_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("config_records");

/// Scheduled jobs keyed by `{namespace}/{job}`.
pub const SCHEDULED_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("scheduled_jobs");

/// Tables whose rows belong to a namespace.
pub const NAMESPACED: [TableDefinition<&str, &[u8]>; 3] = [INGRESSES, CONFIG_RECORDS, SCHEDULED_JOBS];

/// Composite key of a namespaced object.
pub fn scoped_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
