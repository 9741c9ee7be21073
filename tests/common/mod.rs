//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use scopegraph::graph::{StreamData, FS_PER_SECOND};
use scopegraph::{InstrumentCapture, InstrumentId, SessionConfig};
use std::time::Duration;

/// One microsecond in femtoseconds
pub const US: i64 = FS_PER_SECOND / 1_000_000;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Session config tuned for quick tests: short timeouts, sequential evaluation.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        acquisition_timeout_ms: 2000,
        abort_poll_ms: 2,
        retry_backoff_ms: 5,
        evaluation_threads: 1,
        ..Default::default()
    }
}

/// A capture with one analog stream per channel, sampled every microsecond.
pub fn analog_capture(instrument: InstrumentId, channels: &[&[f64]]) -> InstrumentCapture {
    InstrumentCapture::new(
        instrument,
        channels
            .iter()
            .map(|samples| vec![StreamData::analog(US, samples.to_vec())])
            .collect(),
    )
}
