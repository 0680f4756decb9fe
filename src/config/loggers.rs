use serde::{Deserialize, Serialize};

use super::observability::default_true;
use crate::extract::AppProto;

/// Per-protocol transaction loggers.
///
/// A protocol is logged only if its section is present; a present section is enabled unless
/// it says `enabled = false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggersConfig {
    #[serde(default)]
    pub pgsql: ProtoLoggerConfig,

    #[serde(default)]
    pub ftp: ProtoLoggerConfig,

    #[serde(default)]
    pub ssh: ProtoLoggerConfig,
}

impl LoggersConfig {
    pub fn get(&self, proto: AppProto) -> &ProtoLoggerConfig {
        match proto {
            AppProto::Pgsql => &self.pgsql,
            AppProto::Ftp => &self.ftp,
            AppProto::Ssh => &self.ssh,
        }
    }

    /// Enabled loggers, in protocol order.
    pub fn enabled(&self) -> impl Iterator<Item = (AppProto, &ProtoLoggerConfig)> {
        AppProto::ALL
            .into_iter()
            .map(|proto| (proto, self.get(proto)))
            .filter(|(_, logger)| logger.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtoLoggerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Output name; defaults to the first configured output.
    #[serde(default)]
    pub output: Option<String>,

    /// Log password messages (PostgreSQL only).
    #[serde(default)]
    pub passwords: bool,
}

impl Default for ProtoLoggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output: None,
            passwords: false,
        }
    }
}
