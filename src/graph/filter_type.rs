//! Filter type enumeration for creating built-in nodes by name.

use crate::graph::decoders::{PulseDecoder, UartDecoder};
use crate::graph::filters::{FftFilter, GainFilter, MathFilter, MathOp, ScriptFilter, ThresholdFilter, WindowFunction};
use crate::graph::node::{BuiltinFilter, FilterPlugin};
use crate::graph::param::{ConfigValue, ParamError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Types of built-in nodes that can be created at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    // Filters
    Gain,
    Math,
    Threshold,
    Fft,
    Script,

    // Decoders
    Pulse,
    Uart,
}

impl FilterType {
    pub fn display_name(&self) -> &'static str {
        match self {
            FilterType::Gain => "Gain",
            FilterType::Math => "Math",
            FilterType::Threshold => "Threshold",
            FilterType::Fft => "FFT",
            FilterType::Script => "Rhai Script",
            FilterType::Pulse => "Pulse Decoder",
            FilterType::Uart => "UART Decoder",
        }
    }

    /// Type name as reported by the filter itself.
    pub fn type_name(&self) -> &'static str {
        match self {
            FilterType::Gain => "gain",
            FilterType::Math => "math",
            FilterType::Threshold => "threshold",
            FilterType::Fft => "fft",
            FilterType::Script => "script",
            FilterType::Pulse => "pulse",
            FilterType::Uart => "uart",
        }
    }

    pub fn all() -> &'static [FilterType] {
        &[
            FilterType::Gain,
            FilterType::Math,
            FilterType::Threshold,
            FilterType::Fft,
            FilterType::Script,
            FilterType::Pulse,
            FilterType::Uart,
        ]
    }

    pub fn is_decoder(&self) -> bool {
        matches!(self, FilterType::Pulse | FilterType::Uart)
    }

    pub fn description(&self) -> &'static str {
        match self {
            FilterType::Gain => "Scales an analog stream and adds an offset.",
            FilterType::Math => "Adds, subtracts or multiplies two analog streams.",
            FilterType::Threshold => "Converts analog to digital with hysteresis.",
            FilterType::Fft => "Windowed magnitude spectrum in dB.",
            FilterType::Script => "Applies a Rhai expression to every sample.",
            FilterType::Pulse => "Emits a packet for each run above a level.",
            FilterType::Uart => "Decodes 8N1 serial bytes from a digital stream.",
        }
    }

    /// Build a filter with default settings, then apply `params` in order.
    pub fn create(&self, params: &[(String, ConfigValue)]) -> Result<BuiltinFilter, ParamError> {
        let mut filter: BuiltinFilter = match self {
            FilterType::Gain => GainFilter::new(1.0).into(),
            FilterType::Math => MathFilter::new(MathOp::Add).into(),
            FilterType::Threshold => ThresholdFilter::new(0.0).into(),
            FilterType::Fft => FftFilter::new(WindowFunction::Hann).into(),
            FilterType::Script => ScriptFilter::new("x")
                .map_err(|e| ParamError::OutOfRange(e.to_string()))?
                .into(),
            FilterType::Pulse => PulseDecoder::new(0.5).into(),
            FilterType::Uart => UartDecoder::new(115_200.0).into(),
        };
        for (key, value) in params {
            filter.set_param(key, value)?;
        }
        Ok(filter)
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterType::all()
            .iter()
            .copied()
            .find(|t| t.type_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown filter type '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeKind;

    #[test]
    fn test_created_filter_matches_type_name() {
        for ty in FilterType::all() {
            let filter = ty.create(&[]).unwrap();
            assert_eq!(filter.name(), ty.type_name());
            assert_eq!(filter.kind() == NodeKind::Decoder, ty.is_decoder());
        }
    }

    #[test]
    fn test_create_applies_params() {
        let filter = FilterType::Gain
            .create(&[("gain".into(), ConfigValue::Float(3.0))])
            .unwrap();
        assert!(filter
            .params()
            .contains(&("gain".to_string(), ConfigValue::Float(3.0))));
        assert!(FilterType::Gain
            .create(&[("nope".into(), ConfigValue::Bool(true))])
            .is_err());
    }

    #[test]
    fn test_parse() {
        assert_eq!("FFT".parse::<FilterType>(), Ok(FilterType::Fft));
        assert!("lowpass".parse::<FilterType>().is_err());
    }
}
