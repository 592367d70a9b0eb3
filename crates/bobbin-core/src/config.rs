//! Engine configuration.
//!
//! すべての項目に既定値があり、TOML ではそのセクションや項目を省略できます。
//! 時間は `_ms`（ミリ秒）で持ち、`Duration` への変換はアクセサで行います。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub redispatcher: RedispatcherConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl EngineConfig {
    /// Load from a TOML file, or use the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cfg = match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                Self::from_toml(&data)?
            }
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.processor.validate()?;
        self.redispatcher.validate()?;
        self.fetcher.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Number of concurrent executions.
    pub worker_count: usize,

    /// Admitted tasks that may wait for a worker. Total capacity is
    /// `worker_count + queue_size`.
    pub queue_size: usize,

    /// How long `stop()` waits for in-flight executions.
    pub shutdown_grace_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 16,
            queue_size: 1024,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl ProcessorConfig {
    pub fn capacity(&self) -> usize {
        self.worker_count + self.queue_size
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "processor.worker_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedispatcherConfig {
    /// Period of the redispatch loop.
    pub redispatch_interval_ms: u64,

    /// Buffered tasks kept after a periodic cycle; the loop drains down to it.
    pub redispatch_target_size: usize,

    /// Hard bound on buffered tasks. Overflow evicts to the dead-letter sink.
    pub buffer_capacity: usize,

    /// Tasks at or beyond this attempt go to the dead-letter sink.
    pub max_attempts: u32,

    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,

    /// Fraction of the delay randomised away, in `[0, 1]`.
    pub backoff_jitter: f64,
}

impl Default for RedispatcherConfig {
    fn default() -> Self {
        Self {
            redispatch_interval_ms: 5_000,
            redispatch_target_size: 0,
            buffer_capacity: 10_000,
            max_attempts: 100,
            backoff_base_ms: 100,
            backoff_multiplier: 2.0,
            backoff_max_ms: 60_000,
            backoff_jitter: 0.15,
        }
    }
}

impl RedispatcherConfig {
    pub fn redispatch_interval(&self) -> Duration {
        Duration::from_millis(self.redispatch_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.redispatch_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "redispatcher.redispatch_interval_ms must be positive".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "redispatcher.buffer_capacity must be at least 1".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "redispatcher.backoff_multiplier must be a finite value >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::Invalid(
                "redispatcher.backoff_jitter must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// How long a window stays open after its first request.
    pub aggregation_interval_ms: u64,

    /// Distinct shards per window; reaching it closes the window early.
    pub max_batch_size: usize,

    /// Bound on requests waiting for the control loop.
    pub request_buffer_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            aggregation_interval_ms: 100,
            max_batch_size: 100,
            request_buffer_size: 1024,
        }
    }
}

impl FetcherConfig {
    pub fn aggregation_interval(&self) -> Duration {
        Duration::from_millis(self.aggregation_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "fetcher.max_batch_size must be at least 1".into(),
            ));
        }
        if self.request_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "fetcher.request_buffer_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::load(None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.processor.capacity(), 16 + 1024);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg = EngineConfig::from_toml(
            r#"
            [processor]
            worker_count = 4

            [fetcher]
            max_batch_size = 8
            "#,
        )
        .unwrap();

        assert_eq!(cfg.processor.worker_count, 4);
        assert_eq!(cfg.processor.queue_size, 1024);
        assert_eq!(cfg.fetcher.max_batch_size, 8);
        assert_eq!(cfg.redispatcher, RedispatcherConfig::default());
    }

    #[rstest]
    #[case::no_workers("[processor]\nworker_count = 0")]
    #[case::zero_interval("[redispatcher]\nredispatch_interval_ms = 0")]
    #[case::zero_buffer("[redispatcher]\nbuffer_capacity = 0")]
    #[case::shrinking_backoff("[redispatcher]\nbackoff_multiplier = 0.5")]
    #[case::nan_backoff("[redispatcher]\nbackoff_multiplier = nan")]
    #[case::infinite_backoff("[redispatcher]\nbackoff_multiplier = inf")]
    #[case::jitter_out_of_range("[redispatcher]\nbackoff_jitter = 1.5")]
    #[case::zero_batch("[fetcher]\nmax_batch_size = 0")]
    fn invalid_values_are_rejected(#[case] toml: &str) {
        let err = EngineConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EngineConfig::from_toml("[processor\nworker_count = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/bobbin.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn durations_convert_from_millis() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fetcher.aggregation_interval(), Duration::from_millis(100));
        assert_eq!(cfg.redispatcher.backoff_max(), Duration::from_secs(60));
    }
}
