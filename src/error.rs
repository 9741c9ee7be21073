//! Error handling for scopegraph
//!
//! Each subsystem owns a focused error taxonomy (transport, driver,
//! acquisition, graph edit, node evaluation, history, config). This module
//! defines the crate-level [`ScopeError`] that wraps all of them, a Result
//! alias, and a small extension trait for attaching context.

use crate::config::ConfigError;
use crate::graph::{GraphEditError, NodeEvaluationError};
use crate::history::HistoryError;
use crate::instrument::{AcquisitionError, DriverError};
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for scopegraph operations
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Byte-level transport failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Driver creation / identification failures
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Waveform acquisition failures
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Rejected filter graph edits
    #[error("Graph edit error: {0}")]
    GraphEdit(#[from] GraphEditError),

    /// Per-node evaluation failures surfaced to a caller
    #[error("Node evaluation error: {0}")]
    NodeEvaluation(#[from] NodeEvaluationError),

    /// History lookups and retention
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An instrument id that is not (or no longer) part of the session
    #[error("Unknown instrument {0}")]
    UnknownInstrument(u32),

    /// Operation not allowed in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// A worker thread panicked while holding shared state
    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    /// A worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Worker channel closed unexpectedly
    #[error("Channel error: {0}")]
    Channel(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ScopeError>,
    },
}

impl ScopeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ScopeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a poisoned-lock error naming the lock
    pub fn poisoned(what: &str) -> Self {
        ScopeError::Poisoned(what.to_string())
    }
}

/// Result type alias for scopegraph operations
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<ScopeError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeId;

    #[test]
    fn test_error_display() {
        let err = ScopeError::UnknownInstrument(7);
        assert_eq!(err.to_string(), "Unknown instrument 7");
    }

    #[test]
    fn test_error_with_context() {
        let err = ScopeError::from(GraphEditError::UnknownNode(NodeId(3)));
        let with_ctx = err.with_context("Failed to rebind");
        assert!(with_ctx.to_string().contains("Failed to rebind"));
        assert!(with_ctx.to_string().contains("NodeId(3)"));
    }

    #[test]
    fn test_result_ext_converts_domain_errors() {
        let res: std::result::Result<(), AcquisitionError> = Err(AcquisitionError::Timeout {
            waited_ms: 250,
        });
        let err = res.context("Acquiring CH1").unwrap_err();
        assert!(err.to_string().starts_with("Acquiring CH1"));
    }
}
