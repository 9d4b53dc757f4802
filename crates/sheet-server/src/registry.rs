//! Reliability registry: decides the fate of a submission before any work
//! begins.
//!
//! Two maps keyed by fingerprint digest: active jobs (at most one per
//! digest) and recently completed jobs kept for a result-reuse TTL.
//! A completed entry is only ever inserted as its matching active entry
//! is removed, so a digest never has both simultaneously.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use sheet_protocol::{Fingerprint, ProcessResult};

/// What the submission path must do with a new upload.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Fresh submission; the caller starts work under this job id.
    Registered { job_id: String },
    /// An equivalent job is already running; do not start work.
    DuplicateActive { job_id: String },
    /// An equivalent job finished within the TTL; reuse its result.
    DuplicateCompleted {
        job_id: String,
        result: ProcessResult,
    },
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub idempotency_active: bool,
    pub result_ttl: Duration,
    pub enforce_progress_for_large: bool,
    pub large_file_threshold_mb: u64,
}

#[derive(Debug, Clone)]
struct ActiveEntry {
    job_id: String,
    #[allow(dead_code)]
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CompletedEntry {
    job_id: String,
    completed_at: DateTime<Utc>,
    result: ProcessResult,
}

impl CompletedEntry {
    fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.completed_at + ttl < now
    }
}

pub struct UploadRegistry {
    settings: RegistrySettings,
    active: DashMap<String, ActiveEntry>,
    completed: DashMap<String, CompletedEntry>,
}

impl UploadRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            settings,
            active: DashMap::new(),
            completed: DashMap::new(),
        }
    }

    /// Resolve a submission under the digest's entry lock. The factory is
    /// invoked only for fresh submissions, and the active entry lands last
    /// so a panicking factory leaves the registry unchanged.
    pub fn register_or_resolve(
        &self,
        fingerprint: &Fingerprint,
        job_id_factory: impl FnOnce() -> String,
    ) -> SubmissionOutcome {
        if !self.settings.idempotency_active {
            return SubmissionOutcome::Registered {
                job_id: job_id_factory(),
            };
        }

        let digest = fingerprint.digest();
        match self.active.entry(digest.clone()) {
            Entry::Occupied(entry) => SubmissionOutcome::DuplicateActive {
                job_id: entry.get().job_id.clone(),
            },
            Entry::Vacant(slot) => {
                let now = Utc::now();
                if let Some(completed) = self.completed.get(&digest) {
                    if !completed.is_expired(self.settings.result_ttl, now) {
                        return SubmissionOutcome::DuplicateCompleted {
                            job_id: completed.job_id.clone(),
                            result: completed.result.clone(),
                        };
                    }
                }
                self.completed
                    .remove_if(&digest, |_, entry| {
                        entry.is_expired(self.settings.result_ttl, now)
                    });

                let job_id = job_id_factory();
                slot.insert(ActiveEntry {
                    job_id: job_id.clone(),
                    started_at: now,
                });
                SubmissionOutcome::Registered { job_id }
            }
        }
    }

    /// Terminal hook for success: swap the active entry for a completed
    /// one. A job id that no longer matches the active entry is a stale
    /// caller and is ignored.
    pub fn mark_completed(&self, fingerprint: &Fingerprint, job_id: &str, result: &ProcessResult) {
        let digest = fingerprint.digest();
        let removed = self
            .active
            .remove_if(&digest, |_, entry| entry.job_id == job_id);
        if removed.is_some() {
            self.completed.insert(
                digest,
                CompletedEntry {
                    job_id: job_id.to_string(),
                    completed_at: Utc::now(),
                    result: result.clone(),
                },
            );
        } else {
            log::warn!("stale completion for job {job_id} ignored");
        }
    }

    /// Terminal hook for failure: failed work is not cached, so an
    /// immediate retry registers fresh.
    pub fn mark_failed(&self, fingerprint: &Fingerprint, job_id: &str) {
        self.active
            .remove_if(&fingerprint.digest(), |_, entry| entry.job_id == job_id);
    }

    /// Drop a cached completion whose result can no longer be served
    /// (e.g. its output file was deleted after download).
    pub fn invalidate_completed(&self, fingerprint: &Fingerprint) {
        self.completed.remove(&fingerprint.digest());
    }

    /// Gate for the synchronous submission path.
    pub fn should_block_legacy(&self, size_bytes: i64) -> bool {
        self.settings.enforce_progress_for_large
            && size_bytes >= (self.settings.large_file_threshold_mb as i64) * 1024 * 1024
    }

    /// Periodic sweep; lazy eviction on lookup catches anything a missed
    /// tick leaves behind.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.completed.len();
        self.completed
            .retain(|_, entry| !entry.is_expired(self.settings.result_ttl, now));
        before - self.completed.len()
    }

    #[cfg(test)]
    fn backdate_completed(&self, fingerprint: &Fingerprint, age: Duration) {
        if let Some(mut entry) = self.completed.get_mut(&fingerprint.digest()) {
            entry.completed_at = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheet_protocol::PageOrder;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn settings() -> RegistrySettings {
        RegistrySettings {
            idempotency_active: true,
            result_ttl: Duration::minutes(30),
            enforce_progress_for_large: true,
            large_file_threshold_mb: 200,
        }
    }

    fn fp(name: &str) -> Fingerprint {
        Fingerprint::new(name, 4096, 180, PageOrder::Rev)
    }

    fn result(job_id: &str) -> ProcessResult {
        ProcessResult {
            success: true,
            message: "ok".into(),
            output_file_name: format!("{job_id}_out_A180_REV.pdf"),
            download_path: format!("/api/pdf/download/{job_id}_out_A180_REV.pdf"),
            processing_time_millis: 1200,
            input_pages: 3,
            output_pages: 1,
        }
    }

    #[test]
    fn fresh_submission_registers() {
        let registry = UploadRegistry::new(settings());
        match registry.register_or_resolve(&fp("a.pdf"), || "job-1".into()) {
            SubmissionOutcome::Registered { job_id } => assert_eq!(job_id, "job-1"),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[test]
    fn second_submission_sees_active_duplicate() {
        let registry = UploadRegistry::new(settings());
        registry.register_or_resolve(&fp("a.pdf"), || "job-1".into());
        match registry.register_or_resolve(&fp("a.pdf"), || "job-2".into()) {
            SubmissionOutcome::DuplicateActive { job_id } => assert_eq!(job_id, "job-1"),
            other => panic!("expected DuplicateActive, got {other:?}"),
        }
    }

    #[test]
    fn completed_result_round_trips_within_ttl() {
        let registry = UploadRegistry::new(settings());
        registry.register_or_resolve(&fp("a.pdf"), || "job-1".into());
        registry.mark_completed(&fp("a.pdf"), "job-1", &result("job-1"));

        match registry.register_or_resolve(&fp("a.pdf"), || "job-2".into()) {
            SubmissionOutcome::DuplicateCompleted { job_id, result: r } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(r, result("job-1"));
            }
            other => panic!("expected DuplicateCompleted, got {other:?}"),
        }
    }

    #[test]
    fn failure_allows_immediate_retry() {
        let registry = UploadRegistry::new(settings());
        registry.register_or_resolve(&fp("a.pdf"), || "job-1".into());
        registry.mark_failed(&fp("a.pdf"), "job-1");

        match registry.register_or_resolve(&fp("a.pdf"), || "job-2".into()) {
            SubmissionOutcome::Registered { job_id } => assert_eq!(job_id, "job-2"),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[test]
    fn expired_completion_is_evicted_lazily() {
        let registry = UploadRegistry::new(settings());
        registry.register_or_resolve(&fp("a.pdf"), || "job-1".into());
        registry.mark_completed(&fp("a.pdf"), "job-1", &result("job-1"));
        registry.backdate_completed(&fp("a.pdf"), Duration::minutes(31));

        match registry.register_or_resolve(&fp("a.pdf"), || "job-2".into()) {
            SubmissionOutcome::Registered { job_id } => assert_eq!(job_id, "job-2"),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[test]
    fn sweep_drops_expired_entries_only() {
        let registry = UploadRegistry::new(settings());
        for name in ["old.pdf", "fresh.pdf"] {
            registry.register_or_resolve(&fp(name), || format!("job-{name}"));
            registry.mark_completed(&fp(name), &format!("job-{name}"), &result("x"));
        }
        registry.backdate_completed(&fp("old.pdf"), Duration::minutes(31));

        assert_eq!(registry.sweep_expired(), 1);
        assert!(matches!(
            registry.register_or_resolve(&fp("fresh.pdf"), || "new".into()),
            SubmissionOutcome::DuplicateCompleted { .. }
        ));
    }

    #[test]
    fn stale_completion_does_not_clobber_newer_job() {
        let registry = UploadRegistry::new(settings());
        registry.register_or_resolve(&fp("a.pdf"), || "job-2".into());
        // A caller from an earlier run reports completion with the old id.
        registry.mark_completed(&fp("a.pdf"), "job-1", &result("job-1"));

        // Still active under job-2: the stale completion was ignored.
        match registry.register_or_resolve(&fp("a.pdf"), || "job-3".into()) {
            SubmissionOutcome::DuplicateActive { job_id } => assert_eq!(job_id, "job-2"),
            other => panic!("expected DuplicateActive, got {other:?}"),
        }
    }

    #[test]
    fn idempotency_off_always_registers() {
        let registry = UploadRegistry::new(RegistrySettings {
            idempotency_active: false,
            ..settings()
        });
        for i in 0..3 {
            match registry.register_or_resolve(&fp("a.pdf"), || format!("job-{i}")) {
                SubmissionOutcome::Registered { .. } => {}
                other => panic!("expected Registered, got {other:?}"),
            }
        }
    }

    #[test]
    fn legacy_gate_uses_mib_threshold() {
        let registry = UploadRegistry::new(RegistrySettings {
            large_file_threshold_mb: 200,
            ..settings()
        });
        assert!(!registry.should_block_legacy(200 * 1024 * 1024 - 1));
        assert!(registry.should_block_legacy(200 * 1024 * 1024));
        assert!(registry.should_block_legacy(300 * 1024 * 1024));
    }

    #[test]
    fn legacy_gate_disabled_by_config() {
        let registry = UploadRegistry::new(RegistrySettings {
            enforce_progress_for_large: false,
            ..settings()
        });
        assert!(!registry.should_block_legacy(i64::MAX));
    }

    #[test]
    fn concurrent_identical_submissions_register_once() {
        let registry = Arc::new(UploadRegistry::new(settings()));
        let registrations = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let registrations = Arc::clone(&registrations);
                std::thread::spawn(move || {
                    let outcome =
                        registry.register_or_resolve(&fp("same.pdf"), || format!("job-{i}"));
                    if matches!(outcome, SubmissionOutcome::Registered { .. }) {
                        registrations.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registrations.load(Ordering::SeqCst), 1);
    }
}
