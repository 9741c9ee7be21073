//! GainFilter: `y = gain * x + offset` on an analog stream.

use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor};
use crate::graph::param::{expect_float, expect_str, ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, StreamData, StreamType, Unit, WaveformData};

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("in", &[StreamType::Analog])];

pub struct GainFilter {
    gain: f64,
    offset: f64,
    unit: Unit,
}

impl GainFilter {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            offset: 0.0,
            unit: Unit::Volts,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl FilterPlugin for GainFilter {
    fn name(&self) -> &str {
        "gain"
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::analog("out", self.unit)]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.analog(0)?;
        let out = samples.iter().map(|x| self.gain * x + self.offset).collect();
        Ok(vec![StreamData::new(buf.timebase, WaveformData::Analog(out))])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "gain" => self.gain = expect_float(value)?,
            "offset" => self.offset = expect_float(value)?,
            "unit" => {
                let s = expect_str(value)?;
                self.unit = Unit::from_symbol(s)
                    .ok_or_else(|| ParamError::OutOfRange(format!("unknown unit '{}'", s)))?;
            }
            _ => return Err(ParamError::UnknownKey),
        }
        Ok(())
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![
            ("gain".into(), ConfigValue::Float(self.gain)),
            ("offset".into(), ConfigValue::Float(self.offset)),
            ("unit".into(), ConfigValue::from(self.unit.symbol())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::id::{EpochSeq, NodeId};
    use std::sync::Arc;

    #[test]
    fn test_gain_and_offset() {
        let mut f = GainFilter::new(2.0).with_offset(1.0);
        let input = Some(Arc::new(
            StreamData::analog(10, vec![1.0, -1.0]).into_buffer(EpochSeq(1)),
        ));
        let inputs = [input];
        let ctx = EvalContext {
            node: NodeId(1),
            epoch: EpochSeq(1),
            inputs: &inputs,
        };
        let out = f.evaluate(&ctx).unwrap();
        assert_eq!(out[0].data, WaveformData::Analog(vec![3.0, -1.0]));
        assert_eq!(out[0].timebase.timescale_fs(), Some(10));
    }

    #[test]
    fn test_unit_param() {
        let mut f = GainFilter::new(1.0);
        f.set_param("unit", &ConfigValue::from("A")).unwrap();
        assert_eq!(f.outputs()[0].unit, Unit::Amps);
        assert!(f.set_param("unit", &ConfigValue::from("furlong")).is_err());
    }
}
