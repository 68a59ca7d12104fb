// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capture configuration.
//!
//! Supports both programmatic (builder) and file-based (TOML) configuration.
//!
//! ```toml
//! base_folder = "depth_dataset"
//! batch_size = 500
//! sampling_interval = 10
//! use_timestamp_subfolder = true
//! overflow_policy = "drop_oldest"
//!
//! [split_ratio]
//! train = 0.98
//! val = 0.01
//! test = 0.01
//! ```

use crate::batch::SplitRatios;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What to do when the writer queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued batch to make room.
    #[default]
    DropOldest,
    /// Discard the batch being enqueued.
    DropNewest,
}

/// Capture session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Dataset root folder.
    #[serde(default = "default_base_folder")]
    pub base_folder: PathBuf,

    /// Samples per batch file.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capture one sample every N active ticks.
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: u64,

    /// Train/val/test weights.
    #[serde(default)]
    pub split_ratio: SplitRatios,

    /// Append a `YYYY-MM-DD_HH-MM-SS` folder under the base.
    #[serde(default = "default_true")]
    pub use_timestamp_subfolder: bool,

    /// Maximum batches waiting for the writer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Writer dequeue timeout (milliseconds).
    #[serde(default = "default_writer_poll_interval_ms")]
    pub writer_poll_interval_ms: u64,

    /// Bound on the writer join at shutdown (milliseconds).
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// zlib level, 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Fail batches with irregular per-sample shapes instead of degrading.
    #[serde(default)]
    pub strict_shapes: bool,

    /// Seed for split selection.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_base_folder() -> PathBuf {
    PathBuf::from("depth_dataset")
}

fn default_batch_size() -> usize {
    500
}

fn default_sampling_interval() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    32
}

fn default_writer_poll_interval_ms() -> u64 {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

fn default_compression_level() -> u32 {
    6
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_folder: default_base_folder(),
            batch_size: default_batch_size(),
            sampling_interval: default_sampling_interval(),
            split_ratio: SplitRatios::default(),
            use_timestamp_subfolder: true,
            queue_capacity: default_queue_capacity(),
            overflow_policy: OverflowPolicy::default(),
            writer_poll_interval_ms: default_writer_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            compression_level: default_compression_level(),
            strict_shapes: false,
            seed: None,
        }
    }
}

impl CaptureConfig {
    /// Create a config with defaults, rooted at `base_folder`.
    pub fn new<P: AsRef<Path>>(base_folder: P) -> Self {
        Self {
            base_folder: base_folder.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty JSON (session snapshots).
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.sampling_interval == 0 {
            return Err(ConfigError::Invalid(
                "sampling_interval must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.writer_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "writer_poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.compression_level > 9 {
            return Err(ConfigError::Invalid(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.base_folder.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("base_folder is empty".into()));
        }
        self.split_ratio
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Set samples per batch.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the tick sampling interval.
    pub fn sampling_interval(mut self, interval: u64) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Set split weights.
    pub fn split_ratio(mut self, ratios: SplitRatios) -> Self {
        self.split_ratio = ratios;
        self
    }

    /// Enable or disable the timestamp subfolder.
    pub fn use_timestamp_subfolder(mut self, enabled: bool) -> Self {
        self.use_timestamp_subfolder = enabled;
        self
    }

    /// Set writer queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set overflow policy.
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set writer poll interval.
    pub fn writer_poll_interval(mut self, interval: Duration) -> Self {
        self.writer_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set shutdown join bound.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set zlib level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Reject irregular shapes instead of degrading.
    pub fn strict_shapes(mut self, strict: bool) -> Self {
        self.strict_shapes = strict;
        self
    }

    /// Seed split selection.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn writer_poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.writer_poll_interval_ms)
    }

    pub fn shutdown_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.base_folder, PathBuf::from("depth_dataset"));
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.sampling_interval, 10);
        assert_eq!(config.split_ratio, SplitRatios::new(0.98, 0.01, 0.01).expect("r"));
        assert!(config.use_timestamp_subfolder);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.shutdown_timeout_duration(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CaptureConfig::new("/tmp/ds")
            .batch_size(3)
            .sampling_interval(1)
            .use_timestamp_subfolder(false)
            .overflow_policy(OverflowPolicy::DropNewest)
            .shutdown_timeout(Duration::from_millis(500))
            .seed(7);

        assert_eq!(config.base_folder, PathBuf::from("/tmp/ds"));
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.shutdown_timeout_ms, 500);
        assert_eq!(config.seed, Some(7));
        assert!(!config.use_timestamp_subfolder);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CaptureConfig::from_toml(
            r#"
            base_folder = "/data/run1"
            batch_size = 64
            overflow_policy = "drop_newest"

            [split_ratio]
            train = 0.8
            val = 0.1
            test = 0.1
            "#,
        )
        .expect("parse");

        assert_eq!(config.base_folder, PathBuf::from("/data/run1"));
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.sampling_interval, 10);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.split_ratio.train, 0.8);
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("capture.toml");
        std::fs::write(&path, "batch_size = 10\nsampling_interval = 2\n").expect("write");

        let config = CaptureConfig::from_file(&path).expect("load");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.sampling_interval, 2);
    }

    #[test]
    fn test_validation_errors() {
        assert!(CaptureConfig::default().batch_size(0).validate().is_err());
        assert!(CaptureConfig::default().sampling_interval(0).validate().is_err());
        assert!(CaptureConfig::default().queue_capacity(0).validate().is_err());
        assert!(CaptureConfig::default()
            .writer_poll_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CaptureConfig::default()
            .writer_poll_interval(Duration::from_millis(1))
            .validate()
            .is_ok());
        assert!(CaptureConfig::default().compression_level(10).validate().is_err());

        let bad = CaptureConfig::default().split_ratio(SplitRatios {
            train: 0.5,
            val: 0.1,
            test: 0.1,
        });
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));

        let err = CaptureConfig::from_toml("batch_size = 0").expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CaptureConfig::from_toml("writer_poll_interval_ms = 0").expect_err("invalid");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_json_snapshot() {
        let config = CaptureConfig::new("/tmp/ds").batch_size(12);
        let json = config.to_json().expect("json");
        let back: CaptureConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, config);
        assert!(json.contains("\"drop_oldest\""));
    }
}
