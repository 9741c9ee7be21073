//! Rhai expressions applied sample-by-sample to analog waveforms.
//!
//! ## Variables
//!
//! - `x` / `value` - the current sample
//! - `i` - sample index within the buffer
//! - `t` - time of the sample relative to the trigger, in seconds
//! - `dt` - sample period in seconds
//! - `prev` - previous output sample (NaN for the first sample)
//!
//! ## Helper Functions
//!
//! - `clamp(v, lo, hi)` - limit to a range
//! - `deadband(v, center, width)` - snap values near `center` to it
//! - `db(v)` - `20 * log10(|v|)`, floored at -200
//! - `hysteresis(v, prev, lo, hi, lo_val, hi_val)` - two-level output with hysteresis
//!
//! ## Examples
//!
//! Scale a probe:
//! ```rhai
//! x * 10.0
//! ```
//!
//! Full-wave rectify and smooth:
//! ```rhai
//! if prev.is_nan() { abs(x) } else { 0.9 * prev + 0.1 * abs(x) }
//! ```

mod engine;

pub use engine::ScriptEngine;

use rhai::AST;
use thiserror::Error;

/// Errors raised while compiling or running a script.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Compilation error: {0}")]
    Compile(String),

    #[error("Execution error: {0}")]
    Runtime(String),

    #[error("Script must return a number, got {0}")]
    NotNumeric(String),
}

/// A compiled expression, ready to be applied to samples.
#[derive(Clone)]
pub struct CompiledScript {
    ast: AST,
    source: String,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("source", &self.source)
            .finish()
    }
}
