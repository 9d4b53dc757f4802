//! Process-wide service handles, constructed once at startup and injected
//! into handlers. Registry and broker state are process-local; a restart
//! loses them and clients fall back to re-uploading.

use std::sync::atomic::AtomicU64;

use chrono::Duration;

use crate::broker::ProgressBroker;
use crate::config::ServerConfig;
use crate::registry::{RegistrySettings, UploadRegistry};
use crate::storage::UploadStore;

pub struct AppState {
    pub config: ServerConfig,
    pub registry: UploadRegistry,
    pub broker: ProgressBroker,
    pub store: UploadStore,
    /// Composition tasks spawned since startup; lets tests observe the
    /// "at most one run per equivalent upload" guarantee.
    pub compositions_started: AtomicU64,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = UploadRegistry::new(RegistrySettings {
            idempotency_active: config.idempotency_active,
            result_ttl: Duration::minutes(config.recent_result_ttl_minutes as i64),
            enforce_progress_for_large: config.enforce_progress_for_large,
            large_file_threshold_mb: config.large_file_threshold_mb,
        });
        let store = UploadStore::new(
            config.storage_directory.clone(),
            config.max_storage_age_days,
        );

        Self {
            config,
            registry,
            broker: ProgressBroker::new(),
            store,
            compositions_started: AtomicU64::new(0),
        }
    }
}
