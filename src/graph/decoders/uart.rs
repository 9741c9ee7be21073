//! UartDecoder: 8N1 asynchronous serial, idle high, LSB first.
//!
//! Bytes are sampled at the centre of each bit cell. A frame that is still
//! incomplete at the end of a buffer is carried into the next epoch and
//! decoded there, with a start time before that epoch's first sample. This
//! makes the decoder cross-epoch-stateful: only frames wholly inside one
//! buffer are epoch-deterministic.

use crate::graph::error::NodeEvaluationError;
use crate::graph::id::EpochSeq;
use crate::graph::node::{EpochTolerance, EvalContext, FilterPlugin, InputDescriptor, NodeKind};
use crate::graph::param::{expect_float, ConfigValue, ParamError};
use crate::graph::stream::{OutputDescriptor, StreamData, StreamType, Unit, FS_PER_SECOND};
use crate::history::Packet;

static INPUTS: &[InputDescriptor] = &[InputDescriptor::required("rx", &[StreamType::Digital])];

/// Start bit, eight data bits, stop bit.
const FRAME_BITS: usize = 10;

pub struct UartDecoder {
    baud: f64,
    /// Samples from an unfinished frame, starting at its start bit
    pending: Vec<bool>,
    pending_timescale: i64,
    /// Line has been seen high since the last frame
    idle: bool,
    last_epoch: Option<EpochSeq>,
}

impl UartDecoder {
    pub fn new(baud: f64) -> Self {
        Self {
            baud,
            pending: Vec::new(),
            pending_timescale: 0,
            idle: false,
            last_epoch: None,
        }
    }

    pub fn baud(&self) -> f64 {
        self.baud
    }

    /// Samples held over from an unfinished frame.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

impl FilterPlugin for UartDecoder {
    fn name(&self) -> &str {
        "uart"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Decoder
    }

    fn inputs(&self) -> &[InputDescriptor] {
        INPUTS
    }

    fn outputs(&self) -> Vec<OutputDescriptor> {
        vec![OutputDescriptor::new(
            "bytes",
            StreamType::Packet,
            Unit::Dimensionless,
        )]
    }

    fn epoch_tolerance(&self) -> EpochTolerance {
        EpochTolerance::CrossEpoch
    }

    fn evaluate(&mut self, ctx: &EvalContext) -> Result<Vec<StreamData>, NodeEvaluationError> {
        let (buf, samples) = ctx.digital(0)?;

        // An older buffer has already been decoded
        if self.last_epoch.is_some_and(|e| buf.epoch <= e) {
            return Ok(vec![StreamData::packets(Vec::new())]);
        }

        let ts = buf.timebase.timescale_fs().filter(|ts| *ts > 0).ok_or_else(|| {
            NodeEvaluationError::InternalFault("uart input has no time axis".into())
        })?;
        let samples_per_bit = FS_PER_SECOND as f64 / self.baud / ts as f64;
        if samples_per_bit < 1.0 {
            return Err(NodeEvaluationError::InternalFault(format!(
                "sample rate too low for {} baud",
                self.baud
            )));
        }

        self.last_epoch = Some(buf.epoch);
        if self.pending_timescale != ts {
            self.pending.clear();
        }

        let carried = self.pending.len();
        let mut line = std::mem::take(&mut self.pending);
        line.extend_from_slice(samples);
        let origin = buf.timebase.trigger_phase_fs() - carried as i64 * ts;
        let time_of = |index: f64| origin + (index * ts as f64).round() as i64;

        let centre = |start: usize, bit: usize| start + ((bit as f64 + 0.5) * samples_per_bit) as usize;

        let mut packets = Vec::new();
        let mut idle = self.idle || carried > 0;
        let mut i = 0;
        while i < line.len() {
            if line[i] {
                idle = true;
                i += 1;
                continue;
            }
            if !idle {
                i += 1;
                continue;
            }

            let start = i;
            let stop = centre(start, FRAME_BITS - 1);
            if stop >= line.len() {
                self.pending = line.split_off(start);
                self.pending_timescale = ts;
                self.idle = true;
                return Ok(vec![StreamData::packets(packets)]);
            }
            if line[centre(start, 0)] {
                // Glitch shorter than half a bit
                i += 1;
                continue;
            }

            let byte = (0..8).fold(0u8, |acc, bit| {
                acc | (u8::from(line[centre(start, bit + 1)]) << bit)
            });
            let ascii = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte).to_string()
            } else {
                ".".to_string()
            };
            let mut packet = Packet::new(
                ctx.node,
                time_of(start as f64),
                time_of(start as f64 + FRAME_BITS as f64 * samples_per_bit),
            )
            .with_field("data", format!("0x{:02X}", byte))
            .with_field("ascii", ascii);

            let framed = line[stop];
            if !framed {
                packet = packet.with_field("error", "framing");
            }
            packets.push(packet);
            idle = framed;
            i = stop + 1;
        }

        self.idle = idle;
        Ok(vec![StreamData::packets(packets)])
    }

    fn set_param(&mut self, key: &str, value: &ConfigValue) -> Result<(), ParamError> {
        match key {
            "baud" => {
                let baud = expect_float(value)?;
                if !baud.is_finite() || baud <= 0.0 {
                    return Err(ParamError::OutOfRange(format!("baud must be positive, got {}", baud)));
                }
                self.baud = baud;
                self.reset();
                Ok(())
            }
            _ => Err(ParamError::UnknownKey),
        }
    }

    fn params(&self) -> Vec<(String, ConfigValue)> {
        vec![("baud".into(), ConfigValue::Float(self.baud))]
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.idle = false;
        self.last_epoch = None;
    }
}
