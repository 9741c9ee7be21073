//! ThresholdFilter: analog to digital conversion with hysteresis.
//!
//! The output goes high when the input rises above `level + hysteresis / 2`
//! and low when it falls below `level - hysteresis / 2`. The initial state is
//! taken from the first sample compared against `level`.

use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor};
use crate::graph::param::{expect_float, ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, StreamData, StreamType, Unit, WaveformData};

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("in", &[StreamType::Analog])];

pub struct ThresholdFilter {
    level: f64,
    hysteresis: f64,
}

impl ThresholdFilter {
    pub fn new(level: f64) -> Self {
        Self {
            level,
            hysteresis: 0.0,
        }
    }

    pub fn with_hysteresis(mut self, hysteresis: f64) -> Self {
        self.hysteresis = hysteresis.abs();
        self
    }

    fn digitize(&self, samples: &[f64]) -> Vec<bool> {
        let hi = self.level + self.hysteresis / 2.0;
        let lo = self.level - self.hysteresis / 2.0;
        let mut state = samples.first().is_some_and(|&v| v > self.level);
        samples
            .iter()
            .map(|&v| {
                if state && v < lo {
                    state = false;
                } else if !state && v > hi {
                    state = true;
                }
                state
            })
            .collect()
    }
}

impl FilterPlugin for ThresholdFilter {
    fn name(&self) -> &str {
        "threshold"
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::new(
            "out",
            StreamType::Digital,
            Unit::Dimensionless,
        )]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.analog(0)?;
        Ok(vec![StreamData::new(
            buf.timebase,
            WaveformData::Digital(self.digitize(samples)),
        )])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "level" => self.level = expect_float(value)?,
            "hysteresis" => {
                let h = expect_float(value)?;
                if h < 0.0 {
                    return Err(ParamError::OutOfRange("hysteresis must be >= 0".into()));
                }
                self.hysteresis = h;
            }
            _ => return Err(ParamError::UnknownKey),
        }
        Ok(())
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![
            ("level".into(), ConfigValue::Float(self.level)),
            ("hysteresis".into(), ConfigValue::Float(self.hysteresis)),
        ]
    }
}
