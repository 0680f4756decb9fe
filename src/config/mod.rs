//! Configuration for the event output subsystem.
//!
//! The output section is a TOML document handed over by the engine, with support for
//! environment variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [[outputs]]
//! name = "eve"
//! path = "${LOG_DIR}/eve.json"
//! rotate_size = 104857600
//!
//! [loggers.pgsql]
//! output = "eve"
//! ```

mod loggers;
mod observability;
mod outputs;

use std::{path::Path, sync::OnceLock, time::Duration};

pub use loggers::*;
pub use observability::*;
pub use outputs::*;
use serde::{Deserialize, Serialize};

/// Root configuration of the output subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EveConfig {
    /// Diagnostic logging of the subsystem itself.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Event output destinations.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,

    /// Per-protocol transaction loggers.
    #[serde(default)]
    pub loggers: LoggersConfig,
}

/// Settings for workers spawned by [`OutputEngine::spawn_workers`](crate::OutputEngine::spawn_workers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Completions each lane can queue before the producer blocks.
    /// Default: 4096
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Idle time after which a worker flushes its buffers.
    /// Default: 100ms
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl WorkersConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_flush_interval_ms() -> u64 {
    100
}

impl EveConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: EveConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, output) in self.outputs.iter().enumerate() {
            output.validate().map_err(ConfigError::Validation)?;
            if self.outputs[..i].iter().any(|o| o.name == output.name) {
                return Err(ConfigError::Validation(format!(
                    "duplicate output name '{}'",
                    output.name
                )));
            }
            if !output.is_stdout() && self.outputs[..i].iter().any(|o| o.path == output.path) {
                return Err(ConfigError::Validation(format!(
                    "outputs.{}: path '{}' is already used by another output",
                    output.name,
                    output.path.display()
                )));
            }
        }

        for (proto, logger) in self.loggers.enabled() {
            if self.output_for(logger).is_none() {
                return Err(ConfigError::Validation(match &logger.output {
                    Some(name) => format!("loggers.{proto}: unknown output '{name}'"),
                    None => format!("loggers.{proto}: no outputs configured"),
                }));
            }
            if logger.passwords && proto != crate::extract::AppProto::Pgsql {
                return Err(ConfigError::Validation(format!(
                    "loggers.{proto}: 'passwords' is only supported for pgsql"
                )));
            }
        }

        if self.workers.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "workers.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.workers.flush_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "workers.flush_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Index of the output a logger writes to.
    pub fn output_for(&self, logger: &ProtoLoggerConfig) -> Option<usize> {
        match &logger.output {
            Some(name) => self.outputs.iter().position(|o| &o.name == name),
            None if self.outputs.is_empty() => None,
            None => Some(0),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

fn env_var_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").unwrap())
}

/// Expand `${VAR}` references outside of comments.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = env_var_pattern();
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
