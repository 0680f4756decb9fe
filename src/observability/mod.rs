//! Observability of the output subsystem itself.
//!
//! This module provides:
//! - Diagnostic logging with configurable formats (pretty, compact, JSON)
//! - Always-on output counters ([`stats::OutputStats`])
//! - Optional Prometheus metrics mirroring those counters

pub mod metrics;
pub mod stats;
mod tracing_init;

pub use tracing_init::*;
