//! In-process simulated instrument transport (`sim` in connection strings).
//!
//! Path format: `MODEL[:key=value...]`, for example
//! `SIMSCOPE-4:pattern=square:points=2000:rate=1e7:trigger_ms=5`.
//!
//! Recognised options:
//! - `pattern` - `sine`, `square`, `sawtooth`, `triangle`, `uart`, `dc`
//! - `points` - samples per channel per acquisition
//! - `rate` - sample rate in Hz
//! - `trigger_ms` - simulated time between triggers
//! - `fault` - `unresponsive`, `garbage`, `devicefault`

pub mod device;
pub mod pattern;

pub use device::{SimDevice, SimFault, SimModel, SimReply};
pub use pattern::SignalPattern;

use super::{Transport, TransportError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Transport that routes commands to an in-process [`SimDevice`].
pub struct SimTransport {
    device: SimDevice,
    path: String,
    open: bool,
    /// Partially received command bytes.
    inbuf: Vec<u8>,
    /// Replies and the instant they become readable.
    outbox: VecDeque<(Instant, Vec<u8>)>,
}

impl SimTransport {
    pub fn new(device: SimDevice) -> Self {
        let path = device.model_name.clone();
        Self {
            device,
            path,
            open: true,
            inbuf: Vec::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Build a simulated device from a connection-string path.
    pub fn from_path(path: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidTarget(path.to_string());
        let mut fields = path.split(':');
        let model_name = fields.next().filter(|m| !m.is_empty()).ok_or_else(invalid)?;
        let model = SimModel::parse(model_name).ok_or_else(invalid)?;
        let mut device = SimDevice::new(model_name, model);

        for opt in fields {
            let (key, value) = opt.split_once('=').ok_or_else(invalid)?;
            match key {
                "pattern" => device.pattern = SignalPattern::from_name(value).ok_or_else(invalid)?,
                "points" => device.points = value.parse().map_err(|_| invalid())?,
                "rate" => device.sample_rate = value.parse().map_err(|_| invalid())?,
                "trigger_ms" => {
                    device.trigger_interval =
                        Duration::from_millis(value.parse().map_err(|_| invalid())?)
                }
                "fault" => {
                    device.fault = Some(match value {
                        "unresponsive" => SimFault::Unresponsive,
                        "garbage" => SimFault::Garbage,
                        "devicefault" => SimFault::DeviceFault,
                        _ => return Err(invalid()),
                    })
                }
                _ => return Err(invalid()),
            }
        }

        let mut t = Self::new(device);
        t.path = path.to_string();
        Ok(t)
    }

    /// The simulated device, for inspection in tests.
    pub fn device(&self) -> &SimDevice {
        &self.device
    }
}

impl Transport for SimTransport {
    fn name(&self) -> &str {
        "sim"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.inbuf.extend_from_slice(bytes);
        while let Some(pos) = self.inbuf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.inbuf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
            if let Some(reply) = self.device.handle(&line) {
                // Replies are serialised: a slow reply delays everything behind it
                let base = self
                    .outbox
                    .back()
                    .map(|(t, _)| *t)
                    .unwrap_or_else(Instant::now)
                    .max(Instant::now());
                self.outbox
                    .push_back((base + reply.delay, reply.text.into_bytes()));
            }
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let now = Instant::now();
        match self.outbox.front() {
            Some((ready_at, _)) if *ready_at <= now + timeout => {
                let wait = ready_at.saturating_duration_since(now);
                if !wait.is_zero() {
                    std::thread::sleep(wait);
                }
                let (_, bytes) = self.outbox.pop_front().ok_or(TransportError::Closed)?;
                Ok(bytes)
            }
            _ => {
                std::thread::sleep(timeout);
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.outbox.clear();
        self.inbuf.clear();
    }
}
