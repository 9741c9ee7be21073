//! Graph-specific error types.

use crate::graph::id::{EpochSeq, NodeId, StreamId};
use crate::graph::stream::StreamType;
use thiserror::Error;

/// A rejected topology or parameter edit. The graph is unchanged when one of
/// these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphEditError {
    #[error("Binding {consumer} input {input} to stream {producer} would create a cycle")]
    CycleDetected {
        consumer: NodeId,
        input: usize,
        producer: StreamId,
    },

    #[error("Invalid binding: {0}")]
    InvalidBinding(String),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Invalid parameter '{key}' on {node}: {reason}")]
    InvalidParameter {
        node: NodeId,
        key: String,
        reason: String,
    },
}

/// Why a node produced no output for an epoch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeEvaluationError {
    #[error("Required input {input} ('{name}') is not bound")]
    MissingInput { input: usize, name: String },

    #[error("Input {input} expected one of {expected:?}, found {found}")]
    TypeMismatch {
        input: usize,
        expected: Vec<StreamType>,
        found: StreamType,
    },

    #[error("Input {input} holds epoch {found}, evaluating epoch {expected}")]
    StaleInput {
        input: usize,
        found: EpochSeq,
        expected: EpochSeq,
    },

    #[error("Internal fault: {0}")]
    InternalFault(String),
}
