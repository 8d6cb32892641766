//! Cluster store failures.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open cluster store: {0}")]
    Open(String),

    /// A redb transaction, table, read or write step failed.
    #[error("cluster store {op} failed: {detail}")]
    Storage { op: &'static str, detail: String },

    /// A stored object does not round-trip through JSON.
    #[error("object {key} is not valid JSON: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("namespace {0} does not exist")]
    NamespaceNotFound(String),
}
