use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Path value that selects standard output instead of a file.
pub const STDOUT_PATH: &str = "-";

/// What a worker does when its output cannot take a record right away.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the destination and retry failed writes, delaying the worker.
    #[default]
    Block,
    /// Never wait: discard records the destination cannot take and count them.
    Drop,
}

/// One event output destination.
///
/// ```toml
/// [[outputs]]
/// name = "eve"
/// path = "/var/log/evelog/eve.json"
/// rotate_size = 104857600
/// on_backpressure = "drop"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Name that loggers use to refer to this output.
    pub name: String,

    /// Destination file, or `-` for standard output.
    pub path: PathBuf,

    /// Rotate once the current file has reached this many bytes.
    #[serde(default)]
    pub rotate_size: Option<u64>,

    /// Rotate once the current file has been open this many seconds.
    #[serde(default)]
    pub rotate_interval: Option<u64>,

    /// Backpressure policy.
    #[serde(default)]
    pub on_backpressure: BackpressurePolicy,

    /// Per-worker buffer size in bytes that triggers a flush.
    /// Default: 64 KiB. Zero flushes after every record.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Per-worker buffer limit under the `drop` policy; records beyond it are discarded.
    /// Default: 1 MiB
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Write attempts after the first failure under the `block` policy.
    /// Default: 3
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Delay before the first retry; doubled on every further attempt.
    /// Default: 10ms
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Give each worker its own file (`<path>.<worker>`) instead of sharing one.
    #[serde(default)]
    pub threaded: bool,
}

impl OutputConfig {
    /// An output with default buffering and no rotation.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            rotate_size: None,
            rotate_interval: None,
            on_backpressure: BackpressurePolicy::default(),
            buffer_size: default_buffer_size(),
            max_buffer_size: default_max_buffer_size(),
            retry_limit: default_retry_limit(),
            retry_backoff_ms: default_retry_backoff_ms(),
            threaded: false,
        }
    }

    pub fn is_stdout(&self) -> bool {
        self.path.as_os_str() == STDOUT_PATH
    }

    pub fn rotate_interval(&self) -> Option<Duration> {
        self.rotate_interval.map(Duration::from_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("outputs.name must not be empty".into());
        }
        if self.path.as_os_str().is_empty() {
            return Err(format!("outputs.{}: path must not be empty", self.name));
        }
        if self.rotate_size == Some(0) {
            return Err(format!("outputs.{}: rotate_size must be greater than 0", self.name));
        }
        if self.rotate_interval == Some(0) {
            return Err(format!(
                "outputs.{}: rotate_interval must be greater than 0",
                self.name
            ));
        }
        if self.buffer_size > self.max_buffer_size {
            return Err(format!(
                "outputs.{}: buffer_size ({}) exceeds max_buffer_size ({})",
                self.name, self.buffer_size, self.max_buffer_size
            ));
        }
        if self.is_stdout()
            && (self.rotate_size.is_some() || self.rotate_interval.is_some() || self.threaded)
        {
            return Err(format!(
                "outputs.{}: standard output cannot be rotated or threaded",
                self.name
            ));
        }
        Ok(())
    }
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_max_buffer_size() -> usize {
    1024 * 1024
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_defaults() {
        let config: OutputConfig = toml::from_str(
            r#"
            name = "eve"
            path = "/tmp/eve.json"
        "#,
        )
        .unwrap();
        assert_eq!(config.on_backpressure, BackpressurePolicy::Block);
        assert_eq!(config.buffer_size, 64 * 1024);
        assert_eq!(config.retry_limit, 3);
        assert!(config.rotate_interval().is_none());
        assert!(!config.is_stdout());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backpressure_parsing() {
        let config: OutputConfig = toml::from_str(
            r#"
            name = "eve"
            path = "-"
            on_backpressure = "drop"
        "#,
        )
        .unwrap();
        assert_eq!(config.on_backpressure, BackpressurePolicy::Drop);
        assert!(config.is_stdout());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<OutputConfig, _> = toml::from_str(
            r#"
            name = "eve"
            path = "/tmp/eve.json"
            rotate = "daily"
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = OutputConfig::new("eve", "/tmp/eve.json");
        config.rotate_size = Some(0);
        assert!(config.validate().unwrap_err().contains("rotate_size"));

        let mut config = OutputConfig::new("eve", "/tmp/eve.json");
        config.buffer_size = 10;
        config.max_buffer_size = 5;
        assert!(config.validate().unwrap_err().contains("max_buffer_size"));

        let mut config = OutputConfig::new("eve", STDOUT_PATH);
        config.threaded = true;
        assert!(config.validate().unwrap_err().contains("standard output"));
    }
}
