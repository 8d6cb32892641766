//! In-process public/private DNS zones.
//!
//! Each zone maps hostnames to a CNAME record pointing at the zone's
//! load-balancer target.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use one_core::config::DnsConfig;
use one_lifecycle::{BoxFuture, Dns, UpstreamResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// TTL of every record, in seconds.
pub const RECORD_TTL: u32 = 30;

/// A CNAME record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub target: String,
    pub ttl: u32,
}

/// One hosted zone.
#[derive(Debug)]
struct Zone {
    id: String,
    target: String,
    records: RwLock<BTreeMap<String, DnsRecord>>,
}

impl Zone {
    fn new(id: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            target: target.to_string(),
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn upsert(&self, hostname: &str) {
        let record = DnsRecord {
            name: hostname.to_string(),
            target: self.target.clone(),
            ttl: RECORD_TTL,
        };
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(hostname.to_string(), record);
        debug!(zone = %self.id, %hostname, target = %self.target, "upserted DNS record");
    }

    /// Remove a record. An absent record counts as deleted.
    fn delete(&self, hostname: &str) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.remove(hostname).is_some() {
            debug!(zone = %self.id, %hostname, "deleted DNS record");
        } else {
            debug!(zone = %self.id, %hostname, "DNS record already gone");
        }
    }

    fn list(&self) -> Vec<DnsRecord> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.values().cloned().collect()
    }
}

/// Public and private zone pair.
#[derive(Debug, Clone)]
pub struct LocalDns {
    public: Arc<Zone>,
    private: Arc<Zone>,
}

impl LocalDns {
    pub fn new(config: &DnsConfig) -> Self {
        Self {
            public: Arc::new(Zone::new(&config.public_zone, &config.public_target)),
            private: Arc::new(Zone::new(&config.private_zone, &config.private_target)),
        }
    }

    pub fn public_records(&self) -> Vec<DnsRecord> {
        self.public.list()
    }

    pub fn private_records(&self) -> Vec<DnsRecord> {
        self.private.list()
    }
}

impl Dns for LocalDns {
    fn upsert_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.public.upsert(hostname);
            self.private.upsert(hostname);
            Ok(())
        })
    }

    fn delete_record<'a>(&'a self, hostname: &'a str) -> BoxFuture<'a, UpstreamResult<()>> {
        Box::pin(async move {
            self.public.delete(hostname);
            self.private.delete(hostname);
            Ok(())
        })
    }
}
