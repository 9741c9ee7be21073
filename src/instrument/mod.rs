//! Instruments: capability tags, the driver trait, and the driver registry.
//!
//! A driver wraps one open [`Transport`](crate::transport::Transport) and
//! presents the instrument as a set of channels, each with one or more
//! streams. Acquisitions hand back untagged [`StreamData`](crate::graph::StreamData);
//! the session assigns epochs.

pub mod abort;
pub mod driver;
pub mod error;
pub mod registry;
pub mod scpi;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use driver::{AcquireOptions, Acquisition, Identity, InstrumentDriver};
pub use error::{AcquisitionError, DriverError};
pub use registry::{DriverFactory, DriverRegistry};
pub use scpi::{ModelProfile, ProfileKind, ScpiInstrument};

use crate::graph::{InstrumentId, OutputDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument families. One instrument may belong to several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Oscilloscope,
    FunctionGenerator,
    Multimeter,
    PowerSupply,
    RfGenerator,
}

impl Capability {
    pub fn all() -> &'static [Capability] {
        &[
            Capability::Oscilloscope,
            Capability::FunctionGenerator,
            Capability::Multimeter,
            Capability::PowerSupply,
            Capability::RfGenerator,
        ]
    }

    /// Name used in preference paths and config files.
    pub fn family_name(&self) -> &'static str {
        match self {
            Capability::Oscilloscope => "oscilloscope",
            Capability::FunctionGenerator => "function_generator",
            Capability::Multimeter => "multimeter",
            Capability::PowerSupply => "power_supply",
            Capability::RfGenerator => "rf_generator",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Capability::Oscilloscope => "Oscilloscope",
            Capability::FunctionGenerator => "Function Generator",
            Capability::Multimeter => "Multimeter",
            Capability::PowerSupply => "Power Supply",
            Capability::RfGenerator => "RF Generator",
        }
    }

    /// Whether instruments of this family deliver acquisitions.
    pub fn acquires(&self) -> bool {
        matches!(
            self,
            Capability::Oscilloscope | Capability::Multimeter | Capability::PowerSupply
        )
    }

    pub fn from_family_name(name: &str) -> Option<Self> {
        Capability::all()
            .iter()
            .copied()
            .find(|c| c.family_name() == name)
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Small set of [`Capability`] tags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().copied().collect()
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn intersects(&self, other: CapabilitySet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::all().iter().copied().filter(|c| self.contains(*c))
    }

    /// Any member family delivers acquisitions.
    pub fn acquires(&self) -> bool {
        self.iter().any(|c| c.acquires())
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::empty();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// One physical channel and the streams it produces.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    /// Empty for output-only channels (generators)
    pub streams: Vec<OutputDescriptor>,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>, streams: Vec<OutputDescriptor>) -> Self {
        Self {
            name: name.into(),
            streams,
        }
    }
}

/// Summary of a connected instrument, as kept in the session table.
#[derive(Debug, Clone)]
pub struct InstrumentInfo {
    pub id: InstrumentId,
    pub nickname: String,
    pub driver: String,
    pub identity: Identity,
    pub capabilities: CapabilitySet,
    pub channels: Vec<ChannelInfo>,
}
