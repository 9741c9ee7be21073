//! Streams, their descriptors and the epoch-tagged buffers that carry them.
//!
//! A stream is one output of one node. Its payload for a given epoch is a
//! [`StreamBuffer`], shared between consumers as a [`SharedBuffer`] so that
//! fan-out never copies sample data.

use crate::graph::id::{EpochSeq, StreamId};
use crate::history::Packet;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Femtoseconds per second. All graph time values are integer femtoseconds.
pub const FS_PER_SECOND: i64 = 1_000_000_000_000_000;

/// Shape of the data a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamType {
    Analog,
    Digital,
    Complex,
    Packet,
    Trigger,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamType::Analog => "analog",
            StreamType::Digital => "digital",
            StreamType::Complex => "complex",
            StreamType::Packet => "packet",
            StreamType::Trigger => "trigger",
        };
        f.write_str(name)
    }
}

/// Physical unit of a stream's y axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    Volts,
    Amps,
    Watts,
    Hertz,
    Decibels,
    Seconds,
    Counts,
    #[default]
    Dimensionless,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Volts => "V",
            Unit::Amps => "A",
            Unit::Watts => "W",
            Unit::Hertz => "Hz",
            Unit::Decibels => "dB",
            Unit::Seconds => "s",
            Unit::Counts => "counts",
            Unit::Dimensionless => "",
        }
    }

    /// Parse a unit symbol, as used in node parameters.
    pub fn from_symbol(s: &str) -> Option<Self> {
        Some(match s {
            "V" => Unit::Volts,
            "A" => Unit::Amps,
            "W" => Unit::Watts,
            "Hz" => Unit::Hertz,
            "dB" => Unit::Decibels,
            "s" => Unit::Seconds,
            "counts" => Unit::Counts,
            "" => Unit::Dimensionless,
            _ => return None,
        })
    }
}

/// Static description of one output a node declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    pub stream_type: StreamType,
    pub unit: Unit,
}

impl OutputDescriptor {
    pub fn new(name: impl Into<String>, stream_type: StreamType, unit: Unit) -> Self {
        Self {
            name: name.into(),
            stream_type,
            unit,
        }
    }

    pub fn analog(name: impl Into<String>, unit: Unit) -> Self {
        Self::new(name, StreamType::Analog, unit)
    }
}

/// Full description of a live stream in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub name: String,
    pub stream_type: StreamType,
    pub unit: Unit,
    /// Samples per second of the latest buffer, if it is time-domain
    pub sample_rate: Option<f64>,
    /// Length of the latest buffer; `None` until the stream has produced one
    pub length_hint: Option<usize>,
}

/// X-axis of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Timebase {
    /// Uniformly sampled in time. `timescale_fs` is the sample period and
    /// `trigger_phase_fs` the offset of sample 0 from the trigger.
    Time {
        timescale_fs: i64,
        trigger_phase_fs: i64,
    },
    /// Uniform frequency bins, `bin_hz` apart, starting at DC.
    Frequency { bin_hz: f64 },
    /// No x axis: scalar readings and packet streams.
    None,
}

impl Timebase {
    pub fn time(timescale_fs: i64) -> Self {
        Timebase::Time {
            timescale_fs,
            trigger_phase_fs: 0,
        }
    }

    pub fn timescale_fs(&self) -> Option<i64> {
        match self {
            Timebase::Time { timescale_fs, .. } => Some(*timescale_fs),
            _ => None,
        }
    }

    pub fn trigger_phase_fs(&self) -> i64 {
        match self {
            Timebase::Time {
                trigger_phase_fs, ..
            } => *trigger_phase_fs,
            _ => 0,
        }
    }

    /// Samples per second for a time-domain buffer.
    pub fn sample_rate(&self) -> Option<f64> {
        self.timescale_fs()
            .filter(|ts| *ts > 0)
            .map(|ts| FS_PER_SECOND as f64 / ts as f64)
    }

    /// Time of sample `index` relative to the trigger.
    pub fn time_of(&self, index: usize) -> i64 {
        match self {
            Timebase::Time {
                timescale_fs,
                trigger_phase_fs,
            } => trigger_phase_fs + timescale_fs * index as i64,
            _ => 0,
        }
    }
}

/// Sample payload of a buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum WaveformData {
    Analog(Vec<f64>),
    Digital(Vec<bool>),
    Complex(Vec<Complex<f64>>),
    Packets(Vec<Packet>),
    /// Trigger instants, femtoseconds from the epoch's trigger
    Trigger(Vec<i64>),
}

impl WaveformData {
    pub fn stream_type(&self) -> StreamType {
        match self {
            WaveformData::Analog(_) => StreamType::Analog,
            WaveformData::Digital(_) => StreamType::Digital,
            WaveformData::Complex(_) => StreamType::Complex,
            WaveformData::Packets(_) => StreamType::Packet,
            WaveformData::Trigger(_) => StreamType::Trigger,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            WaveformData::Analog(v) => v.len(),
            WaveformData::Digital(v) => v.len(),
            WaveformData::Complex(v) => v.len(),
            WaveformData::Packets(v) => v.len(),
            WaveformData::Trigger(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate heap footprint, for history retention accounting.
    pub fn size_bytes(&self) -> usize {
        match self {
            WaveformData::Analog(v) => v.len() * std::mem::size_of::<f64>(),
            WaveformData::Digital(v) => v.len(),
            WaveformData::Complex(v) => v.len() * std::mem::size_of::<Complex<f64>>(),
            WaveformData::Packets(v) => v.iter().map(Packet::size_bytes).sum(),
            WaveformData::Trigger(v) => v.len() * std::mem::size_of::<i64>(),
        }
    }
}

/// Untagged buffer contents as produced by a driver or a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamData {
    pub timebase: Timebase,
    pub data: WaveformData,
}

impl StreamData {
    pub fn new(timebase: Timebase, data: WaveformData) -> Self {
        Self { timebase, data }
    }

    pub fn analog(timescale_fs: i64, samples: Vec<f64>) -> Self {
        Self::new(Timebase::time(timescale_fs), WaveformData::Analog(samples))
    }

    pub fn digital(timescale_fs: i64, samples: Vec<bool>) -> Self {
        Self::new(Timebase::time(timescale_fs), WaveformData::Digital(samples))
    }

    /// Single reading with no time axis (meters, supplies).
    pub fn scalar(value: f64) -> Self {
        Self::new(Timebase::None, WaveformData::Analog(vec![value]))
    }

    pub fn packets(packets: Vec<Packet>) -> Self {
        Self::new(Timebase::None, WaveformData::Packets(packets))
    }

    /// Tag with the epoch it belongs to.
    pub fn into_buffer(self, epoch: EpochSeq) -> StreamBuffer {
        StreamBuffer {
            epoch,
            timebase: self.timebase,
            data: self.data,
        }
    }
}

/// Immutable, epoch-tagged payload of one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBuffer {
    pub epoch: EpochSeq,
    pub timebase: Timebase,
    pub data: WaveformData,
}

impl StreamBuffer {
    pub fn stream_type(&self) -> StreamType {
        self.data.stream_type()
    }

    pub fn as_analog(&self) -> Option<&[f64]> {
        match &self.data {
            WaveformData::Analog(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_digital(&self) -> Option<&[bool]> {
        match &self.data {
            WaveformData::Digital(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_packets(&self) -> Option<&[Packet]> {
        match &self.data {
            WaveformData::Packets(v) => Some(v),
            _ => None,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.size_bytes()
    }
}

/// Buffers are shared read-only between all consumers and history.
pub type SharedBuffer = Arc<StreamBuffer>;
