//! one-state — embedded store for the standalone cluster backend.
//!
//! Backed by [redb](https://docs.rs/redb), persists the objects a cluster
//! would own: namespaces, ingress rules, config records, and scheduled
//! jobs. Everything except the namespace itself is keyed
//! `{namespace}/{name}`, so deleting a namespace can cascade with a
//! prefix scan.
//!
//! The `ClusterStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::ClusterStore;
