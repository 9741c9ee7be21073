//! Simulated SCPI device answering the command subset the bundled drivers use.
//!
//! The device side is deliberately separate from the drivers: drivers only
//! see bytes, and identify the device from its `*IDN?` reply exactly as they
//! would real hardware.

use super::pattern::SignalPattern;
use std::collections::BTreeMap;
use std::time::Duration;

/// Femtoseconds per second.
const FS_PER_SECOND: f64 = 1e15;

/// Kind of simulated hardware, derived from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimModel {
    /// `SIMSCOPE-<n>`: n-channel oscilloscope that also answers DMM queries
    Scope { channels: usize },
    /// `SIMDMM`: single-channel multimeter
    Multimeter,
    /// `SIMPSU-<n>`: n-channel power supply
    PowerSupply { channels: usize },
    /// `SIMAWG`: function generator
    FunctionGenerator,
    /// `SIMRF`: RF signal generator
    RfGenerator,
}

impl SimModel {
    /// Parse a model name such as `SIMSCOPE-4`.
    pub fn parse(model: &str) -> Option<Self> {
        let (family, count) = match model.split_once('-') {
            Some((f, n)) => (f, Some(n.parse::<usize>().ok()?)),
            None => (model, None),
        };
        match (family, count) {
            ("SIMSCOPE", n) => Some(SimModel::Scope {
                channels: n.unwrap_or(4).clamp(1, 8),
            }),
            ("SIMDMM", None) => Some(SimModel::Multimeter),
            ("SIMPSU", n) => Some(SimModel::PowerSupply {
                channels: n.unwrap_or(2).clamp(1, 4),
            }),
            ("SIMAWG", None) => Some(SimModel::FunctionGenerator),
            ("SIMRF", None) => Some(SimModel::RfGenerator),
            _ => None,
        }
    }
}

/// Injected misbehaviour for exercising driver error paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Never replies to anything
    Unresponsive,
    /// Replies to `*IDN?` with something that is not an identification string
    Garbage,
    /// Identifies normally but every acquisition query reports an error
    DeviceFault,
}

/// A queued reply and the simulated time the device needs to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct SimReply {
    pub text: String,
    pub delay: Duration,
}

impl SimReply {
    fn now(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }
}

/// Simulated instrument state machine.
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub model_name: String,
    pub model: SimModel,
    pub pattern: SignalPattern,
    /// Samples per channel per acquisition
    pub points: usize,
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Time between triggers
    pub trigger_interval: Duration,
    pub fault: Option<SimFault>,
    settings: BTreeMap<String, String>,
    triggers: u64,
}

impl SimDevice {
    pub fn new(model_name: &str, model: SimModel) -> Self {
        Self {
            model_name: model_name.to_string(),
            model,
            pattern: SignalPattern::default(),
            points: 1000,
            sample_rate: 1e6,
            trigger_interval: Duration::from_millis(20),
            fault: None,
            settings: BTreeMap::new(),
            triggers: 0,
        }
    }

    /// Value of a setting written with `SET`.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Number of completed triggers.
    pub fn trigger_count(&self) -> u64 {
        self.triggers
    }

    /// Handle one command line. Returns the reply, if the command produces one.
    pub fn handle(&mut self, line: &str) -> Option<SimReply> {
        if self.fault == Some(SimFault::Unresponsive) {
            return None;
        }

        let line = line.trim();
        let (head, arg) = match line.split_once(' ') {
            Some((h, a)) => (h, a.trim()),
            None => (line, ""),
        };

        match head.to_ascii_uppercase().as_str() {
            "*IDN?" => Some(SimReply::now(self.identify())),
            "*RST" => {
                self.settings.clear();
                None
            }
            "SET" => {
                if let Some((key, value)) = arg.split_once(' ') {
                    self.settings
                        .insert(key.to_ascii_uppercase(), value.trim().to_string());
                }
                None
            }
            "GET?" => Some(SimReply::now(
                self.settings
                    .get(&arg.to_ascii_uppercase())
                    .cloned()
                    .unwrap_or_else(|| "ERR unset".to_string()),
            )),
            ":TRIG:WAIT?" => Some(self.wait_trigger()),
            ":WAV:DATA?" => Some(SimReply::now(self.waveform(arg))),
            "MEAS:VOLT?" => Some(SimReply::now(self.measure(arg, false))),
            "MEAS:CURR?" => Some(SimReply::now(self.measure(arg, true))),
            h if h.ends_with('?') => Some(SimReply::now("ERR unknown command")),
            _ => None,
        }
    }

    fn identify(&self) -> String {
        if self.fault == Some(SimFault::Garbage) {
            return "\u{7f}\u{3}garbage".to_string();
        }
        format!("SCOPEGRAPH,{},SIM0001,1.0", self.model_name)
    }

    fn wait_trigger(&mut self) -> SimReply {
        if self.fault == Some(SimFault::DeviceFault) {
            return SimReply::now("ERR trigger subsystem fault");
        }
        self.triggers += 1;
        SimReply {
            text: format!("TRIG {}", self.triggers),
            delay: self.trigger_interval,
        }
    }

    fn channel_index(arg: &str, channels: usize) -> Option<usize> {
        let n: usize = arg.to_ascii_uppercase().strip_prefix("CH")?.parse().ok()?;
        (1..=channels).contains(&n).then_some(n - 1)
    }

    fn gain(&self, channel: usize) -> f64 {
        self.settings
            .get(&format!("CH{}:GAIN", channel + 1))
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0)
    }

    /// Start time of the current capture, in seconds of device time.
    fn capture_start(&self) -> f64 {
        self.triggers.saturating_sub(1) as f64 * self.points as f64 / self.sample_rate
    }

    fn waveform(&self, arg: &str) -> String {
        if self.fault == Some(SimFault::DeviceFault) {
            return "ERR acquisition fault".to_string();
        }
        let channels = match self.model {
            SimModel::Scope { channels } => channels,
            _ => return "ERR unknown command".to_string(),
        };
        let Some(ch) = Self::channel_index(arg, channels) else {
            return "ERR no such channel".to_string();
        };

        let dt = 1.0 / self.sample_rate;
        let gain = self.gain(ch);
        let samples = self.pattern.sample(self.capture_start(), dt, self.points);
        let body: Vec<String> = samples.iter().map(|v| (v * gain).to_string()).collect();
        format!("{};{}", (dt * FS_PER_SECOND).round() as i64, body.join(","))
    }

    fn measure(&self, arg: &str, current: bool) -> String {
        if self.fault == Some(SimFault::DeviceFault) {
            return "ERR measurement fault".to_string();
        }
        match self.model {
            SimModel::Multimeter | SimModel::Scope { .. } if !current => {
                self.pattern.value_at(self.capture_start()).to_string()
            }
            SimModel::PowerSupply { channels } => {
                let Some(ch) = Self::channel_index(arg, channels) else {
                    return "ERR no such channel".to_string();
                };
                let volts: f64 = self
                    .settings
                    .get(&format!("CH{}:VOLT", ch + 1))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(if ch == 0 { 5.0 } else { 3.3 });
                let load: f64 = self
                    .settings
                    .get("LOAD")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10.0);
                if current {
                    (volts / load).to_string()
                } else {
                    volts.to_string()
                }
            }
            _ => "ERR unknown command".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_parse() {
        assert_eq!(
            SimModel::parse("SIMSCOPE-2"),
            Some(SimModel::Scope { channels: 2 })
        );
        assert_eq!(SimModel::parse("SIMDMM"), Some(SimModel::Multimeter));
        assert_eq!(SimModel::parse("SIMDMM-3"), None);
        assert_eq!(SimModel::parse("KEYSIGHT"), None);
    }

    #[test]
    fn test_identify_and_settings() {
        let mut dev = SimDevice::new("SIMPSU-2", SimModel::PowerSupply { channels: 2 });
        let idn = dev.handle("*IDN?").unwrap();
        assert_eq!(idn.text, "SCOPEGRAPH,SIMPSU-2,SIM0001,1.0");

        assert!(dev.handle("SET ch1:volt 12").is_none());
        assert_eq!(dev.setting("CH1:VOLT"), Some("12"));
        assert_eq!(dev.handle("MEAS:VOLT? CH1").unwrap().text, "12");
        assert_eq!(dev.handle("MEAS:CURR? CH1").unwrap().text, "1.2");
    }

    #[test]
    fn test_waveform_format() {
        let mut dev = SimDevice::new("SIMSCOPE-1", SimModel::Scope { channels: 1 });
        dev.pattern = SignalPattern::Constant(0.5);
        dev.points = 3;
        let trig = dev.handle(":TRIG:WAIT?").unwrap();
        assert_eq!(trig.delay, dev.trigger_interval);
        let wfm = dev.handle(":WAV:DATA? CH1").unwrap().text;
        assert_eq!(wfm, "1000000000;0.5,0.5,0.5");
        assert_eq!(dev.handle(":WAV:DATA? CH2").unwrap().text, "ERR no such channel");
    }

    #[test]
    fn test_unresponsive_fault() {
        let mut dev = SimDevice::new("SIMDMM", SimModel::Multimeter);
        dev.fault = Some(SimFault::Unresponsive);
        assert!(dev.handle("*IDN?").is_none());
    }
}
