//! MathFilter: sample-wise arithmetic on two analog streams.

use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor};
use crate::graph::param::{expect_str, ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, StreamData, StreamType, Unit, WaveformData};

static INPUTS: &[InputDescriptor] = &[
    InputDescriptor::required("a", &[StreamType::Analog]),
    InputDescriptor::required("b", &[StreamType::Analog]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
}

impl MathOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MathOp::Add => "add",
            MathOp::Subtract => "subtract",
            MathOp::Multiply => "multiply",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(MathOp::Add),
            "subtract" => Some(MathOp::Subtract),
            "multiply" => Some(MathOp::Multiply),
            _ => None,
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
        }
    }
}

/// Output length is the shorter of the two inputs. Both inputs must share a
/// timebase.
pub struct MathFilter {
    op: MathOp,
}

impl MathFilter {
    pub fn new(op: MathOp) -> Self {
        Self { op }
    }
}

impl FilterPlugin for MathFilter {
    fn name(&self) -> &str {
        "math"
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        let unit = match self.op {
            MathOp::Multiply => Unit::Dimensionless,
            _ => Unit::Volts,
        };
        vec![OutputDescriptor::analog("out", unit)]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (a_buf, a) = ctx.analog(0)?;
        let (b_buf, b) = ctx.analog(1)?;
        if a_buf.timebase.timescale_fs() != b_buf.timebase.timescale_fs() {
            return Err(NodeEvaluationError::InternalFault(format!(
                "inputs have different timescales ({:?} vs {:?})",
                a_buf.timebase.timescale_fs(),
                b_buf.timebase.timescale_fs()
            )));
        }
        let out = a.iter().zip(b).map(|(x, y)| self.op.apply(*x, *y)).collect();
        Ok(vec![StreamData::new(a_buf.timebase, WaveformData::Analog(out))])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "op" => {
                let s = expect_str(value)?;
                self.op = MathOp::parse(s)
                    .ok_or_else(|| ParamError::OutOfRange(format!("unknown operation '{}'", s)))?;
                Ok(())
            }
            _ => Err(ParamError::UnknownKey),
        }
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![("op".into(), ConfigValue::from(self.op.as_str()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::id::{EpochSeq, NodeId};
    use std::sync::Arc;

    fn run(f: &mut MathFilter, a: Vec<f64>, b: Vec<f64>, ts_b: i64) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let inputs = [
            Some(Arc::new(StreamData::analog(10, a).into_buffer(EpochSeq(1)))),
            Some(Arc::new(StreamData::analog(ts_b, b).into_buffer(EpochSeq(1)))),
        ];
        let ctx = EvalContext {
            node: NodeId(1),
            epoch: EpochSeq(1),
            inputs: &inputs,
        };
        f.evaluate(&ctx)
    }

    #[test]
    fn test_subtract_truncates_to_shorter() {
        let mut f = MathFilter::new(MathOp::Subtract);
        let out = run(&mut f, vec![5.0, 5.0, 5.0], vec![1.0, 2.0], 10).unwrap();
        assert_eq!(out[0].data, WaveformData::Analog(vec![4.0, 3.0]));
    }

    #[test]
    fn test_timescale_mismatch_is_fault() {
        let mut f = MathFilter::new(MathOp::Add);
        let err = run(&mut f, vec![1.0], vec![1.0], 20).unwrap_err();
        assert!(matches!(err, NodeEvaluationError::InternalFault(_)));
    }

    #[test]
    fn test_op_param() {
        let mut f = MathFilter::new(MathOp::Add);
        f.set_param("op", &ConfigValue::from("multiply")).unwrap();
        let out = run(&mut f, vec![3.0], vec![4.0], 10).unwrap();
        assert_eq!(out[0].data, WaveformData::Analog(vec![12.0]));
    }
}
