//! Startup assembly of the output subsystem.
//!
//! [`OutputEngine`] turns an [`EveConfig`] into opened outputs and a frozen
//! [`LoggerRegistry`]. Analyzer modules add their own loggers through [`EngineBuilder`] before
//! [`EngineBuilder::build`]; afterwards the registry can no longer change. Workers are either
//! driven by the caller ([`OutputEngine::worker_context`]) or spawned as a [`WorkerPool`].

mod pool;

use std::{
    io,
    sync::Arc,
};

use parking_lot::Mutex;
pub use pool::WorkerPool;
use thiserror::Error;

use crate::{
    builder::{BuilderResult, JsonBuilder},
    config::{ConfigError, EveConfig, OutputConfig},
    dispatch::WorkerContext,
    extract::{
        Anomalies, AppProto, Extractor, FtpExtractor, PgsqlExtractor, SshExtractor,
        TransactionRef,
    },
    observability::{
        self, TracingError,
        metrics::{self, MetricsError},
        stats::{OutputStats, StatsSnapshot},
    },
    registry::{LoggerRegistry, OutputTargetId, RegistryBuilder, RegistryError},
    sink::{OutputSink, SharedDestination, SinkError, open_destination},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: io::Error,
    },

    #[error("Worker lane {0} has stopped")]
    LaneClosed(usize),

    #[error("A worker pool needs at least one worker")]
    NoWorkers,
}

/// Install diagnostic logging and metrics as configured.
///
/// Both are process-wide and can only be installed once.
pub fn init_observability(config: &EveConfig) -> Result<(), EngineError> {
    observability::init_tracing(&config.logging)?;
    metrics::init_metrics(&config.metrics)?;
    Ok(())
}

/// Collects extra logger registrations before the engine starts.
pub struct EngineBuilder {
    config: EveConfig,
    registry: RegistryBuilder,
}

impl EngineBuilder {
    /// Output target for an output name.
    pub fn target(&self, output: &str) -> Option<OutputTargetId> {
        target_of(&self.config.outputs, output)
    }

    pub fn register(
        &mut self,
        proto: AppProto,
        extractor: impl Extractor + 'static,
        target: OutputTargetId,
    ) -> Result<(), RegistryError> {
        self.registry.register(proto, extractor, target)
    }

    pub fn register_fn<F>(
        &mut self,
        proto: AppProto,
        f: F,
        target: OutputTargetId,
    ) -> Result<(), RegistryError>
    where
        F: Fn(TransactionRef<'_>, &mut JsonBuilder, &mut Anomalies) -> BuilderResult<bool>
            + Send
            + Sync
            + 'static,
    {
        self.registry.register_fn(proto, f, target)
    }

    /// Validate the configuration, register the enabled built-in loggers, open the shared
    /// outputs and freeze the registry.
    ///
    /// A built-in logger enabled in the configuration conflicts with an extra registration
    /// for the same protocol.
    pub fn build(self) -> Result<OutputEngine, EngineError> {
        let Self {
            config,
            mut registry,
        } = self;

        config.validate()?;

        for (proto, logger) in config.loggers.enabled() {
            let Some(index) = config.output_for(logger) else {
                return Err(ConfigError::Validation(format!("loggers.{proto}: no output")).into());
            };
            let target = OutputTargetId::new(index);
            match proto {
                AppProto::Pgsql => {
                    registry.register(proto, PgsqlExtractor::new(logger.passwords), target)?
                }
                AppProto::Ftp => registry.register(proto, FtpExtractor, target)?,
                AppProto::Ssh => registry.register(proto, SshExtractor, target)?,
            }
        }

        let mut destinations = Vec::with_capacity(config.outputs.len());
        for output in &config.outputs {
            if output.threaded {
                destinations.push(None);
            } else {
                let destination: SharedDestination =
                    Arc::new(Mutex::new(open_destination(output, None)?));
                destinations.push(Some(destination));
            }
        }

        let registry = registry.build();
        tracing::info!(
            outputs = config.outputs.len(),
            loggers = ?registry.protocols().collect::<Vec<_>>(),
            "Event output engine started"
        );

        Ok(OutputEngine {
            config,
            registry: Arc::new(registry),
            destinations,
            stats: Arc::new(OutputStats::new()),
        })
    }
}

/// Opened outputs plus the frozen logger registry.
pub struct OutputEngine {
    config: EveConfig,
    registry: Arc<LoggerRegistry>,
    /// Shared destination per output; `None` for threaded outputs.
    destinations: Vec<Option<SharedDestination>>,
    stats: Arc<OutputStats>,
}

impl OutputEngine {
    pub fn builder(config: EveConfig) -> EngineBuilder {
        let registry = RegistryBuilder::new(config.outputs.len());
        EngineBuilder { config, registry }
    }

    /// An engine with only the loggers enabled in `config`.
    pub fn from_config(config: &EveConfig) -> Result<Self, EngineError> {
        Self::builder(config.clone()).build()
    }

    pub fn config(&self) -> &EveConfig {
        &self.config
    }

    pub fn registry(&self) -> &LoggerRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<OutputStats> {
        &self.stats
    }

    pub fn target(&self, output: &str) -> Option<OutputTargetId> {
        target_of(&self.config.outputs, output)
    }

    /// Dispatch state for one worker thread.
    ///
    /// Threaded outputs open the worker's own file here.
    pub fn worker_context(&self, worker_id: usize) -> Result<WorkerContext, EngineError> {
        let mut sinks = Vec::with_capacity(self.config.outputs.len());
        for (output, shared) in self.config.outputs.iter().zip(&self.destinations) {
            let destination = match shared {
                Some(destination) => Arc::clone(destination),
                None => Arc::new(Mutex::new(open_destination(output, Some(worker_id))?)),
            };
            sinks.push(OutputSink::new(output, destination, Arc::clone(&self.stats)));
        }
        Ok(WorkerContext::new(
            worker_id,
            Arc::clone(&self.registry),
            sinks,
            Arc::clone(&self.stats),
        ))
    }

    /// Spawn `workers` worker threads, one per lane.
    pub fn spawn_workers(&self, workers: usize) -> Result<WorkerPool, EngineError> {
        if workers == 0 {
            return Err(EngineError::NoWorkers);
        }
        let contexts = (0..workers)
            .map(|id| self.worker_context(id))
            .collect::<Result<Vec<_>, _>>()?;
        WorkerPool::spawn(contexts, &self.config.workers, Arc::clone(&self.stats))
    }

    /// Flush every shared destination and release the engine's handles.
    ///
    /// Workers still holding a destination keep it open until they shut down.
    pub fn close(self) -> StatsSnapshot {
        for (output, destination) in self.config.outputs.iter().zip(&self.destinations) {
            let Some(destination) = destination else {
                continue;
            };
            if let Err(e) = destination.lock().flush() {
                self.stats.write_failure(&output.name);
                tracing::warn!(output = %output.name, error = %e, "Failed to flush output on close");
            }
        }
        let snapshot = self.stats.snapshot();
        tracing::info!(stats = ?snapshot, "Event output engine closed");
        snapshot
    }
}

fn target_of(outputs: &[OutputConfig], name: &str) -> Option<OutputTargetId> {
    outputs
        .iter()
        .position(|o| o.name == name)
        .map(OutputTargetId::new)
}
