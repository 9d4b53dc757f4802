//! Server configuration from the environment.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Reject synchronous submissions at or above the size threshold.
    pub enforce_progress_for_large: bool,
    /// Threshold in MiB for the synchronous-path gate (1..=2048).
    pub large_file_threshold_mb: u64,
    /// Master switch for submission deduplication.
    pub idempotency_active: bool,
    /// How long completed results are reused (1..=1440 minutes).
    pub recent_result_ttl_minutes: u64,
    /// Where uploads and outputs live, relative to the working directory.
    pub storage_directory: PathBuf,
    /// Output files older than this are swept.
    pub max_storage_age_days: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enforce_progress_for_large: true,
            large_file_threshold_mb: 200,
            idempotency_active: true,
            recent_result_ttl_minutes: 30,
            storage_directory: PathBuf::from("uploads"),
            max_storage_age_days: 1,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            enforce_progress_for_large: env_parse(
                "UPLOAD_ENFORCE_PROGRESS_FOR_LARGE",
                defaults.enforce_progress_for_large,
            )?,
            large_file_threshold_mb: env_parse(
                "UPLOAD_LARGE_FILE_THRESHOLD_MB",
                defaults.large_file_threshold_mb,
            )?,
            idempotency_active: env_parse("UPLOAD_IDEMPOTENCY_ACTIVE", defaults.idempotency_active)?,
            recent_result_ttl_minutes: env_parse(
                "UPLOAD_RECENT_RESULT_TTL_MINUTES",
                defaults.recent_result_ttl_minutes,
            )?,
            storage_directory: env::var("FILE_STORAGE_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_directory),
            max_storage_age_days: env_parse(
                "FILE_STORAGE_MAX_AGE_DAYS",
                defaults.max_storage_age_days,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=2048).contains(&self.large_file_threshold_mb) {
            bail!(
                "UPLOAD_LARGE_FILE_THRESHOLD_MB must be in 1..=2048, got {}",
                self.large_file_threshold_mb
            );
        }
        if !(1..=1440).contains(&self.recent_result_ttl_minutes) {
            bail!(
                "UPLOAD_RECENT_RESULT_TTL_MINUTES must be in 1..=1440, got {}",
                self.recent_result_ttl_minutes
            );
        }
        if self.max_storage_age_days == 0 {
            bail!("FILE_STORAGE_MAX_AGE_DAYS must be positive");
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn threshold_bounds_are_enforced() {
        let mut config = ServerConfig {
            large_file_threshold_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.large_file_threshold_mb = 4096;
        assert!(config.validate().is_err());
        config.large_file_threshold_mb = 2048;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let config = ServerConfig {
            recent_result_ttl_minutes: 2000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
