//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for bulk operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Worker count at 100% concurrency.
    pub base_worker_count: usize,
    /// Share of `base_worker_count` to use, 0-100.
    pub concurrency_percent: u32,
    /// Minimum time between job-record checkpoints after the first one.
    pub checkpoint_interval_secs: u64,
    /// Relationship properties that take part in canonical identity.
    pub distinguishing_properties: Vec<String>,
    /// Relationships deleted concurrently per chunk during cleanup.
    pub relationship_delete_chunk: usize,
    /// Cancel the job once this much time has passed.
    pub job_timeout_secs: Option<u64>,
}

pub const DEFAULT_BASE_WORKERS: usize = 15;
pub const MAX_WORKERS: usize = 100;

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            base_worker_count: DEFAULT_BASE_WORKERS,
            concurrency_percent: 100,
            checkpoint_interval_secs: 20,
            distinguishing_properties: Vec::new(),
            relationship_delete_chunk: 100,
            job_timeout_secs: None,
        }
    }
}

impl BulkConfig {
    /// Defaults overlaid with `GRAPHBULK_*` environment variables.
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse::<usize>("GRAPHBULK_BASE_WORKERS") {
            config.base_worker_count = v;
        }
        if let Some(v) = env_parse::<u32>("GRAPHBULK_CONCURRENCY_PERCENT") {
            config.concurrency_percent = v;
        }
        if let Some(v) = env_parse::<u64>("GRAPHBULK_CHECKPOINT_SECS") {
            config.checkpoint_interval_secs = v;
        }
        if let Some(v) = env_parse::<u64>("GRAPHBULK_JOB_TIMEOUT_SECS") {
            config.job_timeout_secs = Some(v);
        }
        config
    }

    pub fn with_concurrency_percent(mut self, percent: u32) -> Self {
        self.concurrency_percent = percent;
        self
    }

    pub fn with_distinguishing_properties<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinguishing_properties = props.into_iter().map(Into::into).collect();
        self
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        worker_count(self.base_worker_count, self.concurrency_percent)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

/// `floor(base * percent / 100)` clamped to `[1, MAX_WORKERS]`.
pub fn worker_count(base: usize, percent: u32) -> usize {
    let percent = percent.min(100) as usize;
    (base.saturating_mul(percent) / 100).clamp(1, MAX_WORKERS)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_fraction_of_base() {
        assert_eq!(worker_count(15, 100), 15);
        assert_eq!(worker_count(15, 15), 2);
        assert_eq!(worker_count(15, 50), 7);
    }

    #[test]
    fn test_worker_count_clamped() {
        assert_eq!(worker_count(15, 0), 1);
        assert_eq!(worker_count(15, 1), 1);
        assert_eq!(worker_count(1000, 100), MAX_WORKERS);
        assert_eq!(worker_count(15, 250), 15);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BulkConfig =
            serde_json::from_str(r#"{"concurrency_percent": 40}"#).unwrap();
        assert_eq!(config.concurrency_percent, 40);
        assert_eq!(config.base_worker_count, DEFAULT_BASE_WORKERS);
        assert_eq!(config.worker_count(), 6);
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(20));
        assert!(config.job_timeout().is_none());
    }
}
