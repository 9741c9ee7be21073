//! ScriptFilter: user Rhai expression applied to every analog sample.

use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor};
use crate::graph::param::{expect_str, ConfigValue, ParamError};
use crate::graph::stream::{
    OutputDescriptor, StreamData, StreamType, Timebase, Unit, WaveformData, FS_PER_SECOND,
};
use crate::scripting::{CompiledScript, ScriptEngine, ScriptError};

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("in", &[StreamType::Analog])];

pub struct ScriptFilter {
    engine: ScriptEngine,
    script: CompiledScript,
}

impl ScriptFilter {
    pub fn new(source: &str) -> Result<Self, ScriptError> {
        let engine = ScriptEngine::new();
        let script = engine.compile(source)?;
        Ok(Self { engine, script })
    }

    pub fn source(&self) -> &str {
        self.script.source()
    }
}

impl FilterPlugin for ScriptFilter {
    fn name(&self) -> &str {
        "script"
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::analog("out", Unit::Dimensionless)]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.analog(0)?;
        let fs = FS_PER_SECOND as f64;
        let (t0, dt) = match buf.timebase {
            Timebase::Time {
                timescale_fs,
                trigger_phase_fs,
            } => (trigger_phase_fs as f64 / fs, timescale_fs as f64 / fs),
            _ => (0.0, 0.0),
        };
        let out = self
            .engine
            .map_samples(&self.script, samples, t0, dt)
            .map_err(|e| NodeEvaluationError::InternalFault(e.to_string()))?;
        Ok(vec![StreamData::new(buf.timebase, WaveformData::Analog(out))])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "source" => {
                let source = expect_str(value)?;
                self.script = self
                    .engine
                    .compile(source)
                    .map_err(|e| ParamError::OutOfRange(e.to_string()))?;
                Ok(())
            }
            _ => Err(ParamError::UnknownKey),
        }
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![("source".into(), ConfigValue::from(self.script.source()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::id::{EpochSeq, NodeId};
    use std::sync::Arc;

    fn run(f: &mut ScriptFilter, samples: Vec<f64>) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let inputs = [Some(Arc::new(
            StreamData::analog(FS_PER_SECOND, samples).into_buffer(EpochSeq(1)),
        ))];
        f.evaluate(&EvalContext {
            node: NodeId(1),
            epoch: EpochSeq(1),
            inputs: &inputs,
        })
    }

    #[test]
    fn test_doubles_samples() {
        let mut f = ScriptFilter::new("x * 2.0").unwrap();
        let out = run(&mut f, vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out[0].data, WaveformData::Analog(vec![2.0, 4.0, 6.0]));
    }

    #[test]
    fn test_time_variable_uses_timebase() {
        let mut f = ScriptFilter::new("t").unwrap();
        let out = run(&mut f, vec![0.0, 0.0]).unwrap();
        assert_eq!(out[0].data, WaveformData::Analog(vec![0.0, 1.0]));
    }

    #[test]
    fn test_bad_source_param_keeps_old_script() {
        let mut f = ScriptFilter::new("x").unwrap();
        assert!(f.set_param("source", &ConfigValue::from("x +")).is_err());
        assert_eq!(f.source(), "x");
    }

    #[test]
    fn test_runtime_error_is_internal_fault() {
        let mut f = ScriptFilter::new("nope(x)").unwrap();
        assert!(matches!(
            run(&mut f, vec![1.0]),
            Err(NodeEvaluationError::InternalFault(_))
        ));
    }
}
