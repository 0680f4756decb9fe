//! Structured event output for a network traffic inspection engine.
//!
//! Protocol analyzers hand completed transactions to a [`WorkerContext`]. The worker looks up
//! the protocol's registration in the frozen [`LoggerRegistry`], lets the protocol's
//! [`Extractor`] write metadata into the worker's [`JsonBuilder`], wraps the result in the
//! event envelope and appends the finished line to an [`OutputSink`].
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌─────────────┐   ┌──────────┐   ┌────────────┐
//! │ Transaction  │──>│  Registry  │──>│  Extractor  │──>│ Envelope │──>│ OutputSink │
//! │ (borrowed)   │   │  lookup    │   │ (per proto) │   │  + line  │   │ (buffered) │
//! └──────────────┘   └────────────┘   └─────────────┘   └──────────┘   └────────────┘
//! ```

pub mod builder;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod extract;
pub mod observability;
pub mod registry;
pub mod sink;

#[cfg(test)]
mod tests;

pub use builder::{BuilderError, JsonBuilder, MAX_DEPTH, Value};
pub use config::{
    BackpressurePolicy, ConfigError, EveConfig, LoggersConfig, OutputConfig, ProtoLoggerConfig,
};
pub use dispatch::{
    Completion, CompletionEvent, DispatchOutcome, DropReason, FlowTuple, WorkerContext,
};
pub use engine::{EngineBuilder, EngineError, OutputEngine, WorkerPool};
pub use extract::{
    AppProto, Anomalies, Extractor, FnExtractor, TransactionRecord, TransactionRef,
};
pub use observability::stats::{OutputStats, StatsSnapshot};
pub use registry::{LoggerRegistry, OutputTargetId, Registration, RegistryBuilder, RegistryError};
pub use sink::{Destination, OutputSink, RotatingFile, SharedDestination, SinkError};
