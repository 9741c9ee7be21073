//! FftFilter: windowed spectrum of a time-domain analog stream.
//!
//! Outputs:
//! - `magnitude`: single-sided amplitude spectrum in dB, `bin_hz` apart
//! - `spectrum`: the raw complex bins (DC..Nyquist)

use crate::graph::error::NodeEvaluationError;
use crate::graph::node::{EvalContext, FilterPlugin, InputDescriptor};
use crate::graph::param::{expect_str, ConfigValue, ParamError};
use crate::graph::stream::{
    OutputDescriptor, StreamData, StreamType, Timebase, Unit, WaveformData,
};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("in", &[StreamType::Analog])];

/// Magnitudes below this are clamped to the dB floor.
const MAGNITUDE_FLOOR: f64 = 1e-10;
const DB_FLOOR: f64 = -200.0;

/// Window function applied before the transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowFunction {
    /// Rectangular window (no windowing)
    #[default]
    Rectangular,
    /// Hann window (good general purpose)
    Hann,
    /// Hamming window (reduced side lobes)
    Hamming,
    /// Blackman window (very low side lobes)
    Blackman,
    /// Flat-top window (accurate amplitude measurement)
    FlatTop,
}

impl WindowFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowFunction::Rectangular => "rectangular",
            WindowFunction::Hann => "hann",
            WindowFunction::Hamming => "hamming",
            WindowFunction::Blackman => "blackman",
            WindowFunction::FlatTop => "flattop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|w| w.as_str() == s)
    }

    pub fn all() -> &'static [WindowFunction] {
        &[
            WindowFunction::Rectangular,
            WindowFunction::Hann,
            WindowFunction::Hamming,
            WindowFunction::Blackman,
            WindowFunction::FlatTop,
        ]
    }

    /// Window coefficient at position i out of n samples
    pub fn coefficient(&self, i: usize, n: usize) -> f64 {
        let x = 2.0 * PI * i as f64 / n as f64;
        match self {
            WindowFunction::Rectangular => 1.0,
            WindowFunction::Hann => 0.5 * (1.0 - x.cos()),
            WindowFunction::Hamming => 0.54 - 0.46 * x.cos(),
            // Exactly 0 at the endpoints, but rounding can produce -epsilon
            WindowFunction::Blackman => (0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()).max(0.0),
            WindowFunction::FlatTop => {
                0.21557895 - 0.41663158 * x.cos() + 0.277263158 * (2.0 * x).cos()
                    - 0.083578947 * (3.0 * x).cos()
                    + 0.006947368 * (4.0 * x).cos()
            }
        }
    }
}

pub struct FftFilter {
    /// Plan for the most recent input length
    plan: Option<Arc<dyn Fft<f64>>>,
    window: WindowFunction,
    remove_dc: bool,
}

impl Default for FftFilter {
    fn default() -> Self {
        Self::new(WindowFunction::Hann)
    }
}

impl FftFilter {
    pub fn new(window: WindowFunction) -> Self {
        Self {
            plan: None,
            window,
            remove_dc: false,
        }
    }

    pub fn with_dc_removal(mut self, remove_dc: bool) -> Self {
        self.remove_dc = remove_dc;
        self
    }

    fn transform(&mut self, samples: &[f64]) -> Vec<Complex<f64>> {
        let n = samples.len();
        let mean = if self.remove_dc {
            samples.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .enumerate()
            .map(|(i, &s)| Complex::new((s - mean) * self.window.coefficient(i, n), 0.0))
            .collect();
        let fft = match &self.plan {
            Some(fft) if fft.len() == n => fft.clone(),
            _ => {
                let fft = FftPlanner::new().plan_fft_forward(n);
                self.plan = Some(fft.clone());
                fft
            }
        };
        fft.process(&mut buffer);
        buffer.truncate(n / 2 + 1);
        buffer
    }
}

impl FilterPlugin for FftFilter {
    fn name(&self) -> &str {
        "fft"
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![
            OutputDescriptor::analog("magnitude", Unit::Decibels),
            OutputDescriptor::new("spectrum", StreamType::Complex, Unit::Volts),
        ]
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.analog(0)?;
        let sample_rate = buf.timebase.sample_rate().ok_or_else(|| {
            NodeEvaluationError::InternalFault("fft input has no time axis".into())
        })?;

        let n = samples.len();
        if n == 0 {
            let tb = Timebase::Frequency { bin_hz: 0.0 };
            return Ok(vec![
                StreamData::new(tb, WaveformData::Analog(Vec::new())),
                StreamData::new(tb, WaveformData::Complex(Vec::new())),
            ]);
        }

        let bins = self.transform(samples);
        let magnitude_db = bins
            .iter()
            .enumerate()
            .map(|(i, c)| {
                // Single-sided: double everything except DC and Nyquist
                let scale = if i == 0 || (n % 2 == 0 && i == n / 2) { 1.0 } else { 2.0 };
                let mag = c.norm() / n as f64 * scale;
                if mag > MAGNITUDE_FLOOR {
                    20.0 * mag.log10()
                } else {
                    DB_FLOOR
                }
            })
            .collect();

        let tb = Timebase::Frequency {
            bin_hz: sample_rate / n as f64,
        };
        Ok(vec![
            StreamData::new(tb, WaveformData::Analog(magnitude_db)),
            StreamData::new(tb, WaveformData::Complex(bins)),
        ])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "window" => {
                let s = expect_str(value)?;
                self.window = WindowFunction::parse(s)
                    .ok_or_else(|| ParamError::OutOfRange(format!("unknown window '{}'", s)))?;
            }
            "remove_dc" => {
                self.remove_dc = value
                    .as_bool()
                    .ok_or_else(|| ParamError::wrong_type("bool", value))?
            }
            _ => return Err(ParamError::UnknownKey),
        }
        Ok(())
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![
            ("window".into(), ConfigValue::from(self.window.as_str())),
            ("remove_dc".into(), ConfigValue::Bool(self.remove_dc)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::id::{EpochSeq, NodeId};
    use crate::graph::stream::FS_PER_SECOND;

    #[test]
    fn test_window_endpoints() {
        assert!(WindowFunction::Hann.coefficient(0, 64).abs() < 1e-12);
        assert!((WindowFunction::Hann.coefficient(32, 64) - 1.0).abs() < 1e-12);
        assert_eq!(WindowFunction::Rectangular.coefficient(5, 64), 1.0);
        assert!(WindowFunction::Blackman.coefficient(0, 64) >= 0.0);
    }

    #[test]
    fn test_window_names_round_trip() {
        for w in WindowFunction::all() {
            assert_eq!(WindowFunction::parse(w.as_str()), Some(*w));
        }
    }

    #[test]
    fn test_sine_peak_lands_in_right_bin() {
        let rate = 1024.0;
        let n = 1024;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * 100.0 * i as f64 / rate).sin())
            .collect();
        let ts = (FS_PER_SECOND as f64 / rate) as i64;
        let inputs = [Some(Arc::new(
            StreamData::analog(ts, samples).into_buffer(EpochSeq(1)),
        ))];
        let ctx = EvalContext {
            node: NodeId(1),
            epoch: EpochSeq(1),
            inputs: &inputs,
        };

        let mut f = FftFilter::new(WindowFunction::Rectangular);
        let out = f.evaluate(&ctx).unwrap();
        let WaveformData::Analog(db) = &out[0].data else {
            panic!("magnitude is not analog");
        };
        assert_eq!(db.len(), n / 2 + 1);
        let peak = db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 100);
        // Unit-amplitude sine is 0 dB
        assert!(db[100].abs() < 0.01);
        match out[0].timebase {
            Timebase::Frequency { bin_hz } => assert!((bin_hz - 1.0).abs() < 1e-6),
            other => panic!("unexpected timebase {:?}", other),
        }
    }
}
