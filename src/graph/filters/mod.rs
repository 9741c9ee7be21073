//! Built-in filter implementations.

mod fft;
mod gain;
mod math;
mod script;
mod threshold;

pub use fft::{FftFilter, WindowFunction};
pub use gain::GainFilter;
pub use math::{MathFilter, MathOp};
pub use script::ScriptFilter;
pub use threshold::ThresholdFilter;
