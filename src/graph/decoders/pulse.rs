//! PulseDecoder: one packet per run of samples above a level.

use super::format_duration;
use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor, NodeKind};
use crate::graph::param::{expect_float, ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, StreamData, StreamType, Unit};
use crate::history::Packet;

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("in", &[StreamType::Analog])];

/// Stateless: the packets of an epoch depend only on that epoch's input.
pub struct PulseDecoder {
    level: f64,
}

impl PulseDecoder {
    pub fn new(level: f64) -> Self {
        Self { level }
    }

    pub fn level(&self) -> f64 {
        self.level
    }
}

impl FilterPlugin for PulseDecoder {
    fn name(&self) -> &str {
        "pulse"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Decoder
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::new(
            "pulses",
            StreamType::Packet,
            Unit::Dimensionless,
        )]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.analog(0)?;
        let tb = buf.timebase;
        let mut packets = Vec::new();
        let mut run: Option<(usize, f64)> = None;

        // One extra step closes a run that reaches the end of the buffer
        for i in 0..=samples.len() {
            let above = samples.get(i).is_some_and(|&v| v > self.level);
            match (run, above) {
                (None, true) => run = Some((i, samples[i])),
                (Some((start, peak)), true) => run = Some((start, peak.max(samples[i]))),
                (Some((start, peak)), false) => {
                    let (t0, t1) = (tb.time_of(start), tb.time_of(i));
                    packets.push(
                        Packet::new(ctx.node, t0, t1)
                            .with_field("peak", format!("{}", peak))
                            .with_field("width", format_duration(t1 - t0)),
                    );
                    run = None;
                }
                (None, false) => {}
            }
        }

        Ok(vec![StreamData::packets(packets)])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "level" => self.level = expect_float(value)?,
            _ => return Err(ParamError::UnknownKey),
        }
        Ok(())
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![("level".into(), ConfigValue::Float(self.level))]
    }
}
