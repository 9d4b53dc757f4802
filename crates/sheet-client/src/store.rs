//! Keyed client-side job store.
//!
//! Keys are `sheetbuilder:job:<fingerprint digest>`; a browser front end
//! backs this with persistent storage, tests and headless callers use the
//! in-memory map. Entry freshness is the caller's concern; the client
//! purges entries older than an hour on access.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sheet_protocol::Fingerprint;

pub const STORE_KEY_PREFIX: &str = "sheetbuilder:job:";

pub fn store_key(fingerprint: &Fingerprint) -> String {
    format!("{STORE_KEY_PREFIX}{}", fingerprint.digest())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StoredStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredJob {
    pub job_id: String,
    pub status: StoredStatus,
    pub updated_at: DateTime<Utc>,
}

pub trait JobStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredJob>;
    fn put(&self, key: &str, job: StoredJob);
    fn remove(&self, key: &str);
}

/// In-memory store for tests and non-browser callers.
#[derive(Default)]
pub struct MemoryJobStore {
    entries: Mutex<HashMap<String, StoredJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, key: &str) -> Option<StoredJob> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn put(&self, key: &str, job: StoredJob) {
        self.entries.lock().unwrap().insert(key.to_string(), job);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_protocol::PageOrder;

    #[test]
    fn key_is_prefixed_digest() {
        let fp = Fingerprint::new("a.pdf", 10, 0, PageOrder::Norm);
        let key = store_key(&fp);
        assert!(key.starts_with(STORE_KEY_PREFIX));
        assert_eq!(key.len(), STORE_KEY_PREFIX.len() + 64);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryJobStore::new();
        let job = StoredJob {
            job_id: "abc123def456".into(),
            status: StoredStatus::Processing,
            updated_at: Utc::now(),
        };
        store.put("k", job.clone());
        assert_eq!(store.get("k"), Some(job));
        store.remove("k");
        assert_eq!(store.get("k"), None);
    }
}
