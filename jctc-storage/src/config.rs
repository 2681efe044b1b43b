//! Retention Engine Configuration
//!
//! Loaded from environment variables with the `JCTC_` prefix; every value
//! has a default.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::telemetry::{LogConfig, LogFormat, LogLevel};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between background passes
    pub interval_secs: u64,
    /// Lifecycle actions executing at once
    pub max_concurrency: usize,
    /// Capacity of the evaluation → execution channel
    pub queue_capacity: usize,
    /// Entities fetched per source call
    pub batch_size: usize,
    /// Retries for storage failures
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Retries for key-management failures before escalation
    pub key_retry_limit: u32,
    /// Lifetime of cached case-level hold lookups
    pub hold_cache_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            max_concurrency: 8,
            queue_capacity: 256,
            batch_size: 500,
            max_retries: 3,
            retry_base_delay_ms: 200,
            key_retry_limit: 1,
            hold_cache_ttl_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn hold_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_cache_ttl_secs)
    }

    /// Backoff before retry number `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

/// Restoration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationConfig {
    /// Longest staging window a requester may ask for
    pub max_duration_hours: u32,
    /// Seconds between reaper sweeps
    pub reaper_interval_secs: u64,
}

impl Default for RestorationConfig {
    fn default() -> Self {
        Self {
            max_duration_hours: 72,
            reaper_interval_secs: 60,
        }
    }
}

impl RestorationConfig {
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

/// Local storage layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./jctc-data"),
        }
    }
}

impl StorageConfig {
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    /// Development key store file
    pub fn key_file(&self) -> PathBuf {
        self.data_dir.join("keys.json")
    }
}

/// A configuration problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub scheduler: SchedulerConfig,
    pub restoration: RestorationConfig,
    pub storage: StorageConfig,
    pub logging: LogConfig,
}

impl RetentionConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - JCTC_SCHEDULER_INTERVAL_SECS: seconds between passes
    /// - JCTC_MAX_CONCURRENCY: concurrent lifecycle actions
    /// - JCTC_QUEUE_CAPACITY: evaluation queue capacity
    /// - JCTC_BATCH_SIZE: entities per source fetch
    /// - JCTC_MAX_RETRIES: storage retry attempts
    /// - JCTC_RETRY_BASE_DELAY_MS: initial backoff
    /// - JCTC_KEY_RETRY_LIMIT: key-management retry attempts
    /// - JCTC_HOLD_CACHE_TTL_SECS: hold cache lifetime
    /// - JCTC_MAX_RESTORE_HOURS: longest restoration window
    /// - JCTC_REAPER_INTERVAL_SECS: staging reaper period
    /// - JCTC_DATA_DIR: blob, index and key directory
    /// - JCTC_LOG_LEVEL: trace/debug/info/warn/error
    /// - JCTC_LOG_FORMAT: pretty/json/compact
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unparsable values keep their default
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let mut config = Self::default();
        let s = &mut config.scheduler;
        if let Some(v) = parsed("JCTC_SCHEDULER_INTERVAL_SECS") {
            s.interval_secs = v;
        }
        if let Some(v) = parsed("JCTC_MAX_CONCURRENCY") {
            s.max_concurrency = v as usize;
        }
        if let Some(v) = parsed("JCTC_QUEUE_CAPACITY") {
            s.queue_capacity = v as usize;
        }
        if let Some(v) = parsed("JCTC_BATCH_SIZE") {
            s.batch_size = v as usize;
        }
        if let Some(v) = parsed("JCTC_MAX_RETRIES") {
            s.max_retries = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = parsed("JCTC_RETRY_BASE_DELAY_MS") {
            s.retry_base_delay_ms = v;
        }
        if let Some(v) = parsed("JCTC_KEY_RETRY_LIMIT") {
            s.key_retry_limit = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = parsed("JCTC_HOLD_CACHE_TTL_SECS") {
            s.hold_cache_ttl_secs = v;
        }

        if let Some(v) = parsed("JCTC_MAX_RESTORE_HOURS") {
            config.restoration.max_duration_hours = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = parsed("JCTC_REAPER_INTERVAL_SECS") {
            config.restoration.reaper_interval_secs = v;
        }

        if let Some(dir) = lookup("JCTC_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.storage.data_dir = PathBuf::from(dir);
        }

        if let Some(level) = lookup("JCTC_LOG_LEVEL").and_then(|v| LogLevel::parse(&v)) {
            config.logging.level = level;
        }
        if let Some(format) = lookup("JCTC_LOG_FORMAT").and_then(|v| LogFormat::parse(&v)) {
            config.logging.format = format;
        }

        config
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let s = &self.scheduler;

        if s.interval_secs == 0 {
            issues.push(ConfigIssue::new("scheduler.interval_secs", "must be positive"));
        }
        if s.max_concurrency == 0 {
            issues.push(ConfigIssue::new("scheduler.max_concurrency", "must be positive"));
        }
        if s.queue_capacity == 0 {
            issues.push(ConfigIssue::new("scheduler.queue_capacity", "must be positive"));
        }
        if s.batch_size == 0 {
            issues.push(ConfigIssue::new("scheduler.batch_size", "must be positive"));
        }
        if s.key_retry_limit > s.max_retries {
            issues.push(ConfigIssue::new(
                "scheduler.key_retry_limit",
                format!("must not exceed max_retries ({})", s.max_retries),
            ));
        }
        if s.hold_cache_ttl_secs > s.interval_secs {
            issues.push(ConfigIssue::new(
                "scheduler.hold_cache_ttl_secs",
                format!(
                    "must not exceed the scheduling interval ({}s)",
                    s.interval_secs
                ),
            ));
        }

        let r = &self.restoration;
        if r.max_duration_hours == 0 {
            issues.push(ConfigIssue::new("restoration.max_duration_hours", "must be positive"));
        }
        if r.reaper_interval_secs == 0 {
            issues.push(ConfigIssue::new("restoration.reaper_interval_secs", "must be positive"));
        }

        issues
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RetentionConfig::default();
        assert!(config.is_valid(), "{:?}", config.validate());
    }

    #[test]
    fn test_from_lookup() {
        let config = RetentionConfig::from_lookup(lookup(&[
            ("JCTC_MAX_CONCURRENCY", "2"),
            ("JCTC_BATCH_SIZE", "not-a-number"),
            ("JCTC_DATA_DIR", "/var/lib/jctc"),
            ("JCTC_LOG_FORMAT", "json"),
            ("JCTC_MAX_RESTORE_HOURS", "24"),
        ]));
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.scheduler.batch_size, 500);
        assert_eq!(config.storage.blob_dir(), PathBuf::from("/var/lib/jctc/blobs"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.restoration.max_duration_hours, 24);
    }

    #[test]
    fn test_cache_ttl_bounded_by_interval() {
        let config = RetentionConfig::from_lookup(lookup(&[
            ("JCTC_SCHEDULER_INTERVAL_SECS", "60"),
            ("JCTC_HOLD_CACHE_TTL_SECS", "120"),
        ]));
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "scheduler.hold_cache_ttl_secs");
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let config = SchedulerConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(800));
    }
}
