//! Filter graph: instrument channels, filters and decoders wired into a DAG.
//!
//! Data flows from source nodes (one per instrument channel) through filters
//! to decoders. Each acquisition epoch publishes fresh source buffers, and
//! only the nodes downstream of those sources are re-evaluated.
//!
//! # Architecture
//!
//! ```text
//! [scope CH1] ──► [gain] ──► [threshold] ──► [uart]  ──► history
//! [scope CH2] ──► [math] ◄──┘
//!                   └──► [fft]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinFilter` for all built-in filters.
//! - **Shared buffers**: outputs are `Arc<StreamBuffer>`; fan-out never copies.
//! - **Cached plan**: topological order recompiled only when the topology changes.
//! - **Failure isolation**: a failed node blocks its dependents and nothing else.

pub mod compiler;
pub mod decoders;
pub mod error;
pub mod executor;
pub mod filter_type;
pub mod filters;
pub mod id;
pub mod node;
pub mod param;
pub mod plan;
pub mod snapshot;
pub mod stream;

pub use compiler::GraphCompiler;
pub use error::{GraphEditError, NodeEvaluationError};
pub use executor::{EpochReport, FilterGraph, NodeStatus};
pub use filter_type::FilterType;
pub use id::{EpochSeq, InstrumentId, NodeId, StreamId};
pub use node::{
    AnyFilter, BuiltinFilter, EpochTolerance, EvalContext, FilterPlugin, InputBinding,
    InputDescriptor, Node, NodeKind, SourceChannel,
};
pub use param::{ConfigValue, ParamError};
pub use plan::{EvaluationPlan, PlanStats};
pub use snapshot::{EdgeSnapshot, GraphSnapshot, NodeSnapshot};
pub use stream::{
    OutputDescriptor, SharedBuffer, StreamBuffer, StreamData, StreamDescriptor, StreamType,
    Timebase, Unit, WaveformData, FS_PER_SECOND,
};
