//! Node abstraction for the filter graph.
//!
//! Two-layer design:
//! - **`FilterPlugin` trait** - for user-defined filters and decoders.
//! - **`BuiltinFilter` enum** - for all built-in filters. Match arms inline,
//!   so the hot path has no dynamic dispatch.
//!
//! `AnyFilter` wraps either variant so the graph can handle both uniformly.
//! Instrument channels enter the graph as [`NodeBody::Source`] nodes, which
//! have no inputs and are published by the session rather than evaluated.

use crate::graph::decoders::{PulseDecoder, UartDecoder};
use crate::graph::error::NodeEvaluationError;
use crate::graph::filters::{FftFilter, GainFilter, MathFilter, ScriptFilter, ThresholdFilter};
use crate::graph::id::{EpochSeq, InstrumentId, NodeId, StreamId};
use crate::graph::param::{ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, SharedBuffer, StreamBuffer, StreamData, StreamType};
use serde::{Deserialize, Serialize};

/// Role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// One instrument channel
    Source,
    /// Waveform transform
    Filter,
    /// Produces packet streams that are recorded into history
    Decoder,
}

/// Whether a node may consume buffers from an older epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EpochTolerance {
    /// Stateless: every input must belong to the epoch being evaluated.
    #[default]
    CurrentOnly,
    /// Carries state across epochs and tolerates stale inputs.
    CrossEpoch,
}

/// Static descriptor for one input slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputDescriptor {
    pub name: &'static str,
    pub accepts: &'static [StreamType],
    pub optional: bool,
}

impl InputDescriptor {
    pub const fn required(name: &'static str, accepts: &'static [StreamType]) -> Self {
        Self {
            name,
            accepts,
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, accepts: &'static [StreamType]) -> Self {
        Self {
            name,
            accepts,
            optional: true,
        }
    }

    pub fn accepts(&self, ty: StreamType) -> bool {
        self.accepts.contains(&ty)
    }
}

/// What a filter sees while evaluating one epoch.
pub struct EvalContext<'a> {
    /// Id of the node being evaluated
    pub node: NodeId,
    pub epoch: EpochSeq,
    /// One entry per declared input; `None` for unbound optional inputs
    pub inputs: &'a [Option<SharedBuffer>],
}

impl<'a> EvalContext<'a> {
    /// Buffer on input `index`.
    pub fn input(&self, index: usize) -> Result<&'a StreamBuffer, NodeEvaluationError> {
        self.optional_input(index)
            .ok_or_else(|| NodeEvaluationError::MissingInput {
                input: index,
                name: format!("#{}", index),
            })
    }

    pub fn optional_input(&self, index: usize) -> Option<&'a StreamBuffer> {
        self.inputs.get(index).and_then(|b| b.as_deref())
    }

    /// Analog samples on input `index`.
    pub fn analog(&self, index: usize) -> Result<(&'a StreamBuffer, &'a [f64]), NodeEvaluationError> {
        let buf = self.input(index)?;
        let samples = buf
            .as_analog()
            .ok_or_else(|| NodeEvaluationError::TypeMismatch {
                input: index,
                expected: vec![StreamType::Analog],
                found: buf.stream_type(),
            })?;
        Ok((buf, samples))
    }

    /// Digital samples on input `index`.
    pub fn digital(&self, index: usize) -> Result<(&'a StreamBuffer, &'a [bool]), NodeEvaluationError> {
        let buf = self.input(index)?;
        let samples = buf
            .as_digital()
            .ok_or_else(|| NodeEvaluationError::TypeMismatch {
                input: index,
                expected: vec![StreamType::Digital],
                found: buf.stream_type(),
            })?;
        Ok((buf, samples))
    }
}

/// Trait for pluggable/user-defined filters.
pub trait FilterPlugin: Send {
    /// Type name of this filter, e.g. `"gain"`.
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    /// Input slots, in binding order.
    fn inputs(&self) -> &[InputDescriptor];

    /// Output streams. Must stay stable unless parameters change.
    fn outputs(&self) -> Vec<OutputDescriptor>;

    fn epoch_tolerance(&self) -> EpochTolerance {
        EpochTolerance::CurrentOnly
    }

    /// Compute one buffer per declared output.
    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError>;

    /// Change a typed parameter.
    fn set_param(&mut self, _key: &str, _value: &ConfigValue) -> Result<(), ParamError> {
        Err(ParamError::UnknownKey)
    }

    /// Current parameter values, for snapshots.
    fn params(&self) -> Vec<(String, ConfigValue)> {
        Vec::new()
    }

    /// Drop any state carried between epochs.
    fn reset(&mut self) {}
}

/// Enum dispatch for built-in filters.
pub enum BuiltinFilter {
    Gain(GainFilter),
    Math(MathFilter),
    Threshold(ThresholdFilter),
    Fft(FftFilter),
    Script(ScriptFilter),
    PulseDecoder(PulseDecoder),
    UartDecoder(UartDecoder),
}

macro_rules! dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            BuiltinFilter::Gain($f) => $body,
            BuiltinFilter::Math($f) => $body,
            BuiltinFilter::Threshold($f) => $body,
            BuiltinFilter::Fft($f) => $body,
            BuiltinFilter::Script($f) => $body,
            BuiltinFilter::PulseDecoder($f) => $body,
            BuiltinFilter::UartDecoder($f) => $body,
        }
    };
}

impl FilterPlugin for BuiltinFilter {
    fn name(&self) -> &str {
        dispatch!(self, f => f.name())
    }

    fn kind(&self) -> NodeKind {
        dispatch!(self, f => f.kind())
    }

    fn inputs(&self) -> &[InputDescriptor] {
        dispatch!(self, f => f.inputs())
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        dispatch!(self, f => f.outputs())
    }

    fn epoch_tolerance(&self) -> EpochTolerance {
        dispatch!(self, f => f.epoch_tolerance())
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        dispatch!(self, f => f.evaluate(ctx))
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        dispatch!(self, f => f.set_param(key, value))
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        dispatch!(self, f => f.params())
    }

    fn reset(&mut self) {
        dispatch!(self, f => f.reset())
    }
}

macro_rules! impl_from_builtin {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for BuiltinFilter {
                fn from(f: $ty) -> Self {
                    BuiltinFilter::$variant(f)
                }
            }

            impl From<$ty> for AnyFilter {
                fn from(f: $ty) -> Self {
                    AnyFilter::Builtin(BuiltinFilter::$variant(f))
                }
            }
        )*
    };
}

impl_from_builtin!(
    Gain(GainFilter),
    Math(MathFilter),
    Threshold(ThresholdFilter),
    Fft(FftFilter),
    Script(ScriptFilter),
    PulseDecoder(PulseDecoder),
    UartDecoder(UartDecoder),
);

/// Wrapper that holds either a built-in filter (enum dispatch) or a plugin (trait object).
pub enum AnyFilter {
    Builtin(BuiltinFilter),
    Plugin(Box<dyn FilterPlugin>),
}

impl AnyFilter {
    pub fn plugin(filter: impl FilterPlugin + 'static) -> Self {
        AnyFilter::Plugin(Box::new(filter))
    }

    fn inner(&self) -> &dyn FilterPlugin {
        match self {
            AnyFilter::Builtin(f) => f,
            AnyFilter::Plugin(f) => f.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FilterPlugin {
        match self {
            AnyFilter::Builtin(f) => f,
            AnyFilter::Plugin(f) => f.as_mut(),
        }
    }
}

impl From<BuiltinFilter> for AnyFilter {
    fn from(f: BuiltinFilter) -> Self {
        AnyFilter::Builtin(f)
    }
}

impl From<Box<dyn FilterPlugin>> for AnyFilter {
    fn from(f: Box<dyn FilterPlugin>) -> Self {
        AnyFilter::Plugin(f)
    }
}

impl FilterPlugin for AnyFilter {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn kind(&self) -> NodeKind {
        self.inner().kind()
    }

    fn inputs(&self) -> &[InputDescriptor] {
        self.inner().inputs()
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        self.inner().outputs()
    }

    fn epoch_tolerance(&self) -> EpochTolerance {
        self.inner().epoch_tolerance()
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        self.inner_mut().evaluate(ctx)
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        self.inner_mut().set_param(key, value)
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        self.inner().params()
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }
}

/// An instrument channel feeding the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceChannel {
    pub instrument: InstrumentId,
    /// Channel index on the instrument
    pub channel: usize,
    pub streams: Vec<OutputDescriptor>,
}

pub enum NodeBody {
    Source(SourceChannel),
    Filter(AnyFilter),
}

/// State of one input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputBinding {
    Unbound,
    Bound(StreamId),
    /// The producer was removed; the binding is kept so it can be reported.
    Dangling(StreamId),
}

impl InputBinding {
    pub fn producer(&self) -> Option<StreamId> {
        match self {
            InputBinding::Bound(s) => Some(*s),
            _ => None,
        }
    }
}

/// A node of the filter graph.
pub struct Node {
    pub id: NodeId,
    /// Display label
    pub name: String,
    pub body: NodeBody,
    /// One binding per declared input
    pub inputs: Vec<InputBinding>,
    pub enabled: bool,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String, body: NodeBody) -> Self {
        let input_count = match &body {
            NodeBody::Source(_) => 0,
            NodeBody::Filter(f) => f.inputs().len(),
        };
        Self {
            id,
            name,
            body,
            inputs: vec![InputBinding::Unbound; input_count],
            enabled: true,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match &self.body {
            NodeBody::Source(_) => NodeKind::Source,
            NodeBody::Filter(f) => f.kind(),
        }
    }

    pub fn type_name(&self) -> &str {
        match &self.body {
            NodeBody::Source(_) => "source",
            NodeBody::Filter(f) => f.name(),
        }
    }

    pub fn input_descriptors(&self) -> &[InputDescriptor] {
        match &self.body {
            NodeBody::Source(_) => &[],
            NodeBody::Filter(f) => f.inputs(),
        }
    }

    pub fn outputs(&self) -> Vec<OutputDescriptor> {
        match &self.body {
            NodeBody::Source(s) => s.streams.clone(),
            NodeBody::Filter(f) => f.outputs(),
        }
    }

    pub fn epoch_tolerance(&self) -> EpochTolerance {
        match &self.body {
            NodeBody::Source(_) => EpochTolerance::CurrentOnly,
            NodeBody::Filter(f) => f.epoch_tolerance(),
        }
    }

    pub fn source(&self) -> Option<&SourceChannel> {
        match &self.body {
            NodeBody::Source(s) => Some(s),
            NodeBody::Filter(_) => None,
        }
    }

    pub fn filter(&self) -> Option<&AnyFilter> {
        match &self.body {
            NodeBody::Filter(f) => Some(f),
            NodeBody::Source(_) => None,
        }
    }

    pub fn filter_mut(&mut self) -> Option<&mut AnyFilter> {
        match &mut self.body {
            NodeBody::Filter(f) => Some(f),
            NodeBody::Source(_) => None,
        }
    }

    /// Producers of all bound inputs.
    pub fn producers(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.inputs.iter().filter_map(InputBinding::producer)
    }
}
