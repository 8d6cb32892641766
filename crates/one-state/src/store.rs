//! ClusterStore — redb-backed persistence for the standalone cluster.
//!
//! Provides typed CRUD over namespaces, ingress rules, config records, and
//! scheduled jobs. Domain types are JSON-serialized into redb's `&[u8]`
//! value columns; config records are stored verbatim. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use one_core::{IngressRule, NamespacePhase, NamespaceSummary, SelfDestructJob};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Tag a redb error with the step that failed.
macro_rules! storage {
    ($op:literal) => {
        |e| StateError::Storage {
            op: $op,
            detail: e.to_string(),
        }
    };
}

/// Thread-safe cluster store backed by redb.
#[derive(Clone)]
pub struct ClusterStore {
    db: Arc<Database>,
}

impl ClusterStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "cluster store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StateError::Open(e.to_string()))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory cluster store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(storage!("begin write"))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NAMESPACES).map_err(storage!("open table"))?;
        for table in NAMESPACED {
            txn.open_table(table).map_err(storage!("open table"))?;
        }
        txn.commit().map_err(storage!("commit"))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put_raw(&self, table: TableDefinition<&str, &[u8]>, key: &str, value: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(storage!("begin write"))?;
        {
            let mut table = txn.open_table(table).map_err(storage!("open table"))?;
            table.insert(key, value).map_err(storage!("write"))?;
        }
        txn.commit().map_err(storage!("commit"))?;
        Ok(())
    }

    fn put_json<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| StateError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.put_raw(table, key, &bytes)
    }

    fn get_raw(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(storage!("begin read"))?;
        let table = txn.open_table(table).map_err(storage!("open table"))?;
        Ok(table
            .get(key)
            .map_err(storage!("read"))?
            .map(|guard| guard.value().to_vec()))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        match self.get_raw(table, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|source| {
                StateError::Codec {
                    key: key.to_string(),
                    source,
                }
            })?)),
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(storage!("begin read"))?;
        let table = txn.open_table(table).map_err(storage!("open table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage!("read"))? {
            let (key, value) = entry.map_err(storage!("read"))?;
            if key.value().starts_with(prefix) {
                let decoded = serde_json::from_slice(value.value()).map_err(|source| StateError::Codec {
                    key: key.value().to_string(),
                    source,
                })?;
                results.push(decoded);
            }
        }
        Ok(results)
    }

    fn require_namespace(&self, namespace: &str) -> StateResult<()> {
        if self.get_namespace(namespace)?.is_none() {
            return Err(StateError::NamespaceNotFound(namespace.to_string()));
        }
        Ok(())
    }

    // ── Namespaces ─────────────────────────────────────────────────

    /// Insert or update a namespace.
    pub fn put_namespace(&self, namespace: &NamespaceSummary) -> StateResult<()> {
        self.put_json(NAMESPACES, &namespace.name, namespace)?;
        debug!(namespace = %namespace.name, stable = namespace.stable, "namespace stored");
        Ok(())
    }

    /// Get a namespace by name.
    pub fn get_namespace(&self, name: &str) -> StateResult<Option<NamespaceSummary>> {
        self.get_json(NAMESPACES, name)
    }

    /// List all namespaces.
    pub fn list_namespaces(&self) -> StateResult<Vec<NamespaceSummary>> {
        self.scan_json(NAMESPACES, "")
    }

    /// Mark a namespace as terminating without removing it.
    pub fn mark_terminating(&self, name: &str) -> StateResult<bool> {
        match self.get_namespace(name)? {
            Some(mut ns) => {
                ns.phase = NamespacePhase::Terminating;
                self.put_namespace(&ns)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete a namespace and every object stored in it, atomically.
    /// Returns true if the namespace existed.
    pub fn delete_namespace(&self, name: &str) -> StateResult<bool> {
        let prefix = scoped_key(name, "");
        let txn = self.db.begin_write().map_err(storage!("begin write"))?;
        let existed;
        let mut removed = 0usize;
        {
            let mut namespaces = txn.open_table(NAMESPACES).map_err(storage!("open table"))?;
            existed = namespaces.remove(name).map_err(storage!("write"))?.is_some();

            for definition in NAMESPACED {
                let mut table = txn.open_table(definition).map_err(storage!("open table"))?;
                let keys: Vec<String> = table
                    .iter()
                    .map_err(storage!("read"))?
                    .filter_map(|entry| {
                        let (key, _) = entry.ok()?;
                        let k = key.value().to_string();
                        k.starts_with(&prefix).then_some(k)
                    })
                    .collect();
                for key in &keys {
                    table.remove(key.as_str()).map_err(storage!("write"))?;
                }
                removed += keys.len();
            }
        }
        txn.commit().map_err(storage!("commit"))?;
        debug!(namespace = %name, existed, objects_removed = removed, "namespace deleted");
        Ok(existed)
    }

    // ── Ingress rules ──────────────────────────────────────────────

    /// Insert or update an ingress rule. The namespace must exist.
    pub fn put_ingress(&self, namespace: &str, rule: &IngressRule) -> StateResult<()> {
        self.require_namespace(namespace)?;
        self.put_json(INGRESSES, &scoped_key(namespace, &rule.name), rule)
    }

    /// Seed an ingress rule into a namespace that is not managed as an
    /// environment (the clone source). Creates no namespace row.
    pub fn put_template_ingress(&self, namespace: &str, rule: &IngressRule) -> StateResult<()> {
        self.put_json(INGRESSES, &scoped_key(namespace, &rule.name), rule)
    }

    /// List ingress rules of a namespace.
    pub fn list_ingresses(&self, namespace: &str) -> StateResult<Vec<IngressRule>> {
        self.scan_json(INGRESSES, &scoped_key(namespace, ""))
    }

    /// List ingress rules of a namespace belonging to one project.
    pub fn list_ingresses_for_project(
        &self,
        namespace: &str,
        project: &str,
    ) -> StateResult<Vec<IngressRule>> {
        let mut rules = self.list_ingresses(namespace)?;
        rules.retain(|rule| rule.project == project);
        Ok(rules)
    }

    // ── Config records ─────────────────────────────────────────────

    /// Insert or replace an opaque record. The namespace must exist.
    pub fn put_config_record(&self, namespace: &str, key: &str, value: &[u8]) -> StateResult<()> {
        self.require_namespace(namespace)?;
        self.put_raw(CONFIG_RECORDS, &scoped_key(namespace, key), value)?;
        debug!(%namespace, %key, bytes = value.len(), "config record stored");
        Ok(())
    }

    /// Get an opaque record.
    pub fn get_config_record(&self, namespace: &str, key: &str) -> StateResult<Option<Vec<u8>>> {
        self.get_raw(CONFIG_RECORDS, &scoped_key(namespace, key))
    }

    // ── Scheduled jobs ─────────────────────────────────────────────

    /// Insert or update a scheduled job. The namespace must exist.
    pub fn put_scheduled_job(&self, namespace: &str, job: &SelfDestructJob) -> StateResult<()> {
        self.require_namespace(namespace)?;
        self.put_json(SCHEDULED_JOBS, &scoped_key(namespace, &job.name), job)
    }

    /// List scheduled jobs of a namespace.
    pub fn list_scheduled_jobs(&self, namespace: &str) -> StateResult<Vec<SelfDestructJob>> {
        self.scan_json(SCHEDULED_JOBS, &scoped_key(namespace, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_namespace(name: &str, stable: bool) -> NamespaceSummary {
        NamespaceSummary {
            name: name.to_string(),
            stable,
            phase: NamespacePhase::Active,
        }
    }

    fn test_rule(project: &str, name: &str, host: &str) -> IngressRule {
        IngressRule {
            project: project.to_string(),
            name: name.to_string(),
            hosts: vec![host.to_string()],
        }
    }

    fn test_job(name: &str) -> SelfDestructJob {
        SelfDestructJob {
            name: name.to_string(),
            schedule: "0 20 * * *".to_string(),
            suspended: false,
            delete_url: "https://one.example.com/api/stagings/ms-1?delete_secret=x".to_string(),
        }
    }

    // ── Namespace CRUD ─────────────────────────────────────────────

    #[test]
    fn namespace_put_and_get() {
        let store = ClusterStore::open_in_memory().unwrap();
        let ns = test_namespace("ms-1", true);

        store.put_namespace(&ns).unwrap();
        assert_eq!(store.get_namespace("ms-1").unwrap(), Some(ns));
    }

    #[test]
    fn namespace_get_nonexistent_returns_none() {
        let store = ClusterStore::open_in_memory().unwrap();
        assert!(store.get_namespace("nope").unwrap().is_none());
    }

    #[test]
    fn namespace_upsert_updates_labels() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_namespace(&test_namespace("ms-1", false)).unwrap();
        store.put_namespace(&test_namespace("ms-1", true)).unwrap();

        let all = store.list_namespaces().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].stable);
    }

    #[test]
    fn mark_terminating() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_namespace(&test_namespace("ms-1", false)).unwrap();

        assert!(store.mark_terminating("ms-1").unwrap());
        assert!(!store.mark_terminating("ms-2").unwrap());
        let ns = store.get_namespace("ms-1").unwrap().unwrap();
        assert_eq!(ns.phase, NamespacePhase::Terminating);
    }

    #[test]
    fn namespace_delete_cascades() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_namespace(&test_namespace("ms-1", false)).unwrap();
        store.put_namespace(&test_namespace("ms-10", false)).unwrap();
        store.put_ingress("ms-1", &test_rule("portal", "portal", "a.example.com")).unwrap();
        store.put_ingress("ms-10", &test_rule("portal", "portal", "b.example.com")).unwrap();
        store.put_config_record("ms-1", "ms-1", b"{}").unwrap();
        store.put_scheduled_job("ms-1", &test_job("seppuku-ms-1")).unwrap();

        assert!(store.delete_namespace("ms-1").unwrap());
        assert!(!store.delete_namespace("ms-1").unwrap());

        assert!(store.get_namespace("ms-1").unwrap().is_none());
        assert!(store.list_ingresses("ms-1").unwrap().is_empty());
        assert!(store.get_config_record("ms-1", "ms-1").unwrap().is_none());
        assert!(store.list_scheduled_jobs("ms-1").unwrap().is_empty());
        // ms-10 shares the "ms-1" string prefix but not the "ms-1/" key prefix.
        assert_eq!(store.list_ingresses("ms-10").unwrap().len(), 1);
    }

    #[test]
    fn corrupt_object_names_its_key() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_raw(NAMESPACES, "ms-bad", b"not json").unwrap();

        let err = store.get_namespace("ms-bad").unwrap_err();
        assert!(matches!(&err, StateError::Codec { key, .. } if key == "ms-bad"));
        assert!(err.to_string().starts_with("object ms-bad is not valid JSON"));
        assert!(matches!(store.list_namespaces(), Err(StateError::Codec { .. })));
    }

    // ── Namespaced objects ─────────────────────────────────────────

    #[test]
    fn namespaced_writes_require_namespace() {
        let store = ClusterStore::open_in_memory().unwrap();
        let err = store.put_config_record("ms-9", "ms-9", b"{}").unwrap_err();
        assert!(matches!(err, StateError::NamespaceNotFound(_)));
        assert!(store.put_ingress("ms-9", &test_rule("p", "p", "h")).is_err());
        assert!(store.put_scheduled_job("ms-9", &test_job("j")).is_err());
    }

    #[test]
    fn ingress_list_for_project() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_template_ingress("staging", &test_rule("portal", "portal", "portal.example.com")).unwrap();
        store.put_template_ingress("staging", &test_rule("portal", "portal-api", "api.example.com")).unwrap();
        store.put_template_ingress("staging", &test_rule("cards", "cards", "cards.example.com")).unwrap();

        assert_eq!(store.list_ingresses("staging").unwrap().len(), 3);
        assert_eq!(store.list_ingresses_for_project("staging", "portal").unwrap().len(), 2);
        assert!(store.list_ingresses_for_project("staging", "msrvz").unwrap().is_empty());
        // Template namespaces are not listed as managed namespaces.
        assert!(store.list_namespaces().unwrap().is_empty());
    }

    #[test]
    fn config_record_roundtrips_bytes_verbatim() {
        let store = ClusterStore::open_in_memory().unwrap();
        store.put_namespace(&test_namespace("ms-1", false)).unwrap();
        store.put_config_record("ms-1", "ms-1", b"first").unwrap();
        store.put_config_record("ms-1", "ms-1", b"second").unwrap();

        assert_eq!(
            store.get_config_record("ms-1", "ms-1").unwrap().as_deref(),
            Some(&b"second"[..])
        );
        assert!(store.get_config_record("ms-1", "other").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = ClusterStore::open(&db_path).unwrap();
            store.put_namespace(&test_namespace("ms-1", true)).unwrap();
            store.put_scheduled_job("ms-1", &test_job("seppuku-ms-1")).unwrap();
        }

        let store = ClusterStore::open(&db_path).unwrap();
        assert!(store.get_namespace("ms-1").unwrap().is_some());
        assert_eq!(store.list_scheduled_jobs("ms-1").unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = ClusterStore::open_in_memory().unwrap();

        assert!(store.list_namespaces().unwrap().is_empty());
        assert!(store.list_ingresses("any").unwrap().is_empty());
        assert!(store.list_scheduled_jobs("any").unwrap().is_empty());
        assert!(!store.delete_namespace("nope").unwrap());
    }
}
