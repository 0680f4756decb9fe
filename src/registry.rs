//! Protocol to logger routing table.
//!
//! Registrations are collected in a [`RegistryBuilder`] during startup and frozen into a
//! [`LoggerRegistry`] before any worker starts. The frozen registry has no mutation API and is
//! shared by `Arc`; lookups index a fixed array by protocol and never lock.

use std::fmt;

use thiserror::Error;

use crate::{
    builder::{BuilderResult, JsonBuilder},
    extract::{Anomalies, AppProto, Extractor, FnExtractor, TransactionRef},
};

/// Index of an output in the engine's output list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputTargetId(usize);

impl OutputTargetId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OutputTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A protocol's extractor and the output its events go to.
pub struct Registration {
    proto: AppProto,
    extractor: Box<dyn Extractor>,
    target: OutputTargetId,
}

impl Registration {
    pub fn proto(&self) -> AppProto {
        self.proto
    }

    pub fn extractor(&self) -> &dyn Extractor {
        self.extractor.as_ref()
    }

    pub fn target(&self) -> OutputTargetId {
        self.target
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("proto", &self.proto)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A logger for {0} is already registered")]
    Conflict(AppProto),

    #[error("Logger for {proto} refers to unknown output {target} ({outputs} configured)")]
    UnknownTarget {
        proto: AppProto,
        target: OutputTargetId,
        outputs: usize,
    },
}

/// Collects registrations during startup.
pub struct RegistryBuilder {
    slots: [Option<Registration>; AppProto::COUNT],
    outputs: usize,
}

impl RegistryBuilder {
    /// A builder for an engine with `outputs` configured outputs.
    pub fn new(outputs: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
            outputs,
        }
    }

    /// Register the logger for `proto`.
    pub fn register(
        &mut self,
        proto: AppProto,
        extractor: impl Extractor + 'static,
        target: OutputTargetId,
    ) -> Result<(), RegistryError> {
        if target.index() >= self.outputs {
            return Err(RegistryError::UnknownTarget {
                proto,
                target,
                outputs: self.outputs,
            });
        }
        let slot = &mut self.slots[proto.index()];
        if slot.is_some() {
            return Err(RegistryError::Conflict(proto));
        }
        *slot = Some(Registration {
            proto,
            extractor: Box::new(extractor),
            target,
        });
        tracing::debug!(%proto, %target, "Registered transaction logger");
        Ok(())
    }

    /// Register a plain function as the logger for `proto`.
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
        self.register(proto, FnExtractor::new(f), target)
    }

    pub fn is_registered(&self, proto: AppProto) -> bool {
        self.slots[proto.index()].is_some()
    }

    /// Freeze the table.
    pub fn build(self) -> LoggerRegistry {
        LoggerRegistry { slots: self.slots }
    }
}

/// Frozen protocol to logger table.
pub struct LoggerRegistry {
    slots: [Option<Registration>; AppProto::COUNT],
}

impl LoggerRegistry {
    pub fn lookup(&self, proto: AppProto) -> Option<&Registration> {
        self.slots[proto.index()].as_ref()
    }

    /// Registered protocols, in protocol order.
    pub fn protocols(&self) -> impl Iterator<Item = AppProto> + '_ {
        self.slots.iter().flatten().map(Registration::proto)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for LoggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.iter().flatten()).finish()
    }
}
