//! Driver trait for all instruments.

use super::abort::AbortSignal;
use super::error::{AcquisitionError, DriverError};
use super::{CapabilitySet, ChannelInfo};
use crate::graph::{ConfigValue, StreamData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Identification reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Identity {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identity {
    /// Parse an IEEE 488.2 `*IDN?` reply: `vendor,model,serial,firmware`.
    pub fn parse_idn(reply: &str) -> Option<Self> {
        let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
        let printable = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic() || c == ' ');
        match fields.as_slice() {
            [vendor, model, serial, firmware] if fields.iter().all(|f| printable(*f)) => Some(Self {
                vendor: vendor.to_string(),
                model: model.to_string(),
                serial: serial.to_string(),
                firmware: firmware.to_string(),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({})", self.vendor, self.model, self.serial)
    }
}

/// Limits for one blocking acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Give up with `AcquisitionError::Timeout` after this long
    pub timeout: Duration,
    /// How often a blocked driver checks its abort signal
    pub poll_interval: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// One completed acquisition, before epoch assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Device-side trigger counter, for diagnostics
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Indexed like [`InstrumentDriver::channels`]; one entry per stream.
    /// Output-only channels have an empty entry.
    pub channels: Vec<Vec<StreamData>>,
}

/// Uniform surface over heterogeneous instruments.
///
/// Implementations must be `Send` so that each instrument can be moved onto
/// its own acquisition worker.
pub trait InstrumentDriver: Send {
    /// Registry name of the driver, e.g. `"sim_scope"`.
    fn driver_name(&self) -> &str;

    fn identity(&self) -> &Identity;

    fn capabilities(&self) -> CapabilitySet;

    fn channels(&self) -> &[ChannelInfo];

    /// Whether [`acquire_waveforms`](Self::acquire_waveforms) produces data.
    fn acquires(&self) -> bool {
        self.capabilities().acquires()
    }

    /// Block until the next trigger and read every channel.
    ///
    /// Must return `Timeout` rather than block past `options.timeout`, and
    /// `Disconnected` promptly once `abort` fires.
    fn acquire_waveforms(
        &mut self,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<Acquisition, AcquisitionError>;

    /// Change one instrument setting.
    fn configure(&mut self, key: &str, value: &ConfigValue) -> Result<(), DriverError>;

    /// Settings written so far.
    fn settings(&self) -> BTreeMap<String, ConfigValue>;

    /// Release the transport. Further acquisitions fail with `Disconnected`.
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_idn() {
        let id = Identity::parse_idn("SCOPEGRAPH,SIMSCOPE-4,SIM0001,1.0\n").unwrap();
        assert_eq!(id.vendor, "SCOPEGRAPH");
        assert_eq!(id.model, "SIMSCOPE-4");
        assert_eq!(id.to_string(), "SCOPEGRAPH SIMSCOPE-4 (SIM0001)");
    }

    #[test]
    fn test_parse_idn_rejects_garbage() {
        assert!(Identity::parse_idn("\u{7f}\u{3}garbage").is_none());
        assert!(Identity::parse_idn("A,B,C").is_none());
        assert!(Identity::parse_idn("A,,C,D").is_none());
    }
}
