//! Upload staging and output file management.
//!
//! Everything lives flat in one directory: staged uploads as
//! `<guid>_<original>`, finished outputs as
//! `<guid>_<original>_A<rot>_<ORD>.pdf`. Clients may request a download
//! either by the exact stored name or by a bare clean name, which is
//! resolved by suffix search with the most recent file winning.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use sheet_protocol::PageOrder;

pub struct UploadStore {
    dir: PathBuf,
    max_age: Duration,
}

impl UploadStore {
    pub fn new(dir: PathBuf, max_age_days: u64) -> Self {
        Self {
            dir,
            max_age: Duration::from_secs(max_age_days * 24 * 60 * 60),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Strip any path components and control characters from a client
    /// supplied name.
    pub fn sanitize_file_name(name: &str) -> String {
        let base = name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(name)
            .trim()
            .replace(|c: char| c.is_control(), "_");
        if base.is_empty() || base == "." || base == ".." {
            "upload.pdf".to_string()
        } else {
            base
        }
    }

    /// Fresh staging location for an incoming upload.
    pub fn staging_path(&self, original_name: &str) -> PathBuf {
        let guid = Uuid::new_v4().simple().to_string();
        self.dir
            .join(format!("{guid}_{}", Self::sanitize_file_name(original_name)))
    }

    /// Deterministic output name derived from the staged file:
    /// `<staged stem>_A<rot>_<ORD>.pdf`.
    pub fn output_name(staged_path: &Path, rotation: i32, order: PageOrder) -> String {
        let base = staged_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        format!("{base}_A{rotation}_{}.pdf", order.token())
    }

    pub fn output_path(&self, output_name: &str) -> PathBuf {
        self.dir.join(Self::sanitize_file_name(output_name))
    }

    pub fn output_exists(&self, output_name: &str) -> bool {
        self.output_path(output_name).exists()
    }

    /// Resolve a requested download name: exact match first, then a
    /// `*_<name>` suffix search where the most recently modified file
    /// wins.
    pub async fn resolve_download(&self, requested: &str) -> Option<PathBuf> {
        let clean = Self::sanitize_file_name(requested);
        let exact = self.dir.join(&clean);
        if tokio::fs::try_exists(&exact).await.unwrap_or(false) {
            return Some(exact);
        }

        let suffix = format!("_{clean}");
        let mut best: Option<(SystemTime, PathBuf)> = None;
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(&suffix) {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if best.as_ref().map_or(true, |(ts, _)| modified > *ts) {
                best = Some((modified, entry.path()));
            }
        }
        best.map(|(_, path)| path)
    }

    /// Delete files older than the configured storage age. Errors on
    /// individual files are logged and skipped.
    pub async fn sweep_aged(&self) -> usize {
        let now = SystemTime::now();
        let mut removed = 0;

        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok());
            if age.map_or(false, |age| age > self.max_age) {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => log::warn!("failed to sweep {}: {e}", entry.path().display()),
                }
            }
        }

        if removed > 0 {
            log::info!("swept {removed} aged files from {}", self.dir.display());
        }
        removed
    }
}
