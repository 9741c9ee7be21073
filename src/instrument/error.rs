use crate::transport::TransportError;
use thiserror::Error;

/// Failures while creating, identifying or configuring a driver.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Driver '{driver}' does not support device '{identity}'")]
    Unsupported { driver: String, identity: String },

    #[error("Instrument did not respond: {0}")]
    Unresponsive(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Unknown driver '{0}'")]
    UnknownDriver(String),

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures of a single acquisition. The instrument stays usable after
/// `Timeout` and `DeviceFault`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("No acquisition within {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    #[error("Device fault: {0}")]
    DeviceFault(String),

    #[error("Instrument disconnected")]
    Disconnected,
}
