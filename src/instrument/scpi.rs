//! Generic line-based SCPI driver, parameterised by a [`ModelProfile`].
//!
//! The command subset is small: `*IDN?` for identification, `SET`/`GET?`
//! for settings, `:TRIG:WAIT?` to block until a trigger, `:WAV:DATA? CHn`
//! for waveforms (`timescale_fs;v1,v2,...`) and `MEAS:VOLT?`/`MEAS:CURR?`
//! for scalar readings. Replies starting with `ERR` are device faults.

use super::abort::AbortSignal;
use super::driver::{AcquireOptions, Acquisition, Identity, InstrumentDriver};
use super::error::{AcquisitionError, DriverError};
use super::{Capability, CapabilitySet, ChannelInfo};
use crate::graph::{ConfigValue, OutputDescriptor, StreamData, Unit};
use crate::transport::{Transport, TransportError};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// How a model lays out its channels and acquires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Analog channels `CH1..n` plus a `DMM` reading channel
    Scope,
    /// One `DMM` reading channel
    Meter,
    /// Channels `CH1..n`, each with voltage and current streams
    Supply,
    /// Output only
    Generator,
}

/// Static description of a model family served by [`ScpiInstrument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub driver: &'static str,
    pub vendor: &'static str,
    /// The `*IDN?` model must start with this
    pub model_prefix: &'static str,
    pub kind: ProfileKind,
    pub capabilities: &'static [Capability],
    /// Channel count when the model name has no `-N` suffix
    pub default_channels: usize,
}

impl ModelProfile {
    pub const SIM_SCOPE: ModelProfile = ModelProfile {
        driver: "sim_scope",
        vendor: "SCOPEGRAPH",
        model_prefix: "SIMSCOPE",
        kind: ProfileKind::Scope,
        capabilities: &[Capability::Oscilloscope, Capability::Multimeter],
        default_channels: 4,
    };

    pub const SIM_DMM: ModelProfile = ModelProfile {
        driver: "sim_dmm",
        vendor: "SCOPEGRAPH",
        model_prefix: "SIMDMM",
        kind: ProfileKind::Meter,
        capabilities: &[Capability::Multimeter],
        default_channels: 1,
    };

    pub const SIM_PSU: ModelProfile = ModelProfile {
        driver: "sim_psu",
        vendor: "SCOPEGRAPH",
        model_prefix: "SIMPSU",
        kind: ProfileKind::Supply,
        capabilities: &[Capability::PowerSupply],
        default_channels: 2,
    };

    pub const SIM_AWG: ModelProfile = ModelProfile {
        driver: "sim_awg",
        vendor: "SCOPEGRAPH",
        model_prefix: "SIMAWG",
        kind: ProfileKind::Generator,
        capabilities: &[Capability::FunctionGenerator],
        default_channels: 1,
    };

    pub const SIM_RFGEN: ModelProfile = ModelProfile {
        driver: "sim_rfgen",
        vendor: "SCOPEGRAPH",
        model_prefix: "SIMRF",
        kind: ProfileKind::Generator,
        capabilities: &[Capability::RfGenerator],
        default_channels: 1,
    };

    /// Profiles registered by [`DriverRegistry::with_builtin_drivers`](super::DriverRegistry::with_builtin_drivers).
    pub fn builtin() -> &'static [ModelProfile] {
        &[
            Self::SIM_SCOPE,
            Self::SIM_DMM,
            Self::SIM_PSU,
            Self::SIM_AWG,
            Self::SIM_RFGEN,
        ]
    }

    pub fn capability_set(&self) -> CapabilitySet {
        CapabilitySet::of(self.capabilities)
    }

    fn matches(&self, identity: &Identity) -> bool {
        identity.vendor.eq_ignore_ascii_case(self.vendor) && identity.model.starts_with(self.model_prefix)
    }

    fn channel_count(&self, model: &str) -> usize {
        model
            .rsplit_once('-')
            .and_then(|(_, n)| n.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.default_channels)
    }

    fn channel_layout(&self, model: &str) -> Vec<ChannelInfo> {
        let numbered = |n: usize| (1..=n).map(|i| format!("CH{}", i));
        match self.kind {
            ProfileKind::Scope => numbered(self.channel_count(model))
                .map(|name| ChannelInfo::new(name.clone(), vec![OutputDescriptor::analog(name, Unit::Volts)]))
                .chain(std::iter::once(dmm_channel()))
                .collect(),
            ProfileKind::Meter => vec![dmm_channel()],
            ProfileKind::Supply => numbered(self.channel_count(model))
                .map(|name| {
                    ChannelInfo::new(
                        name,
                        vec![
                            OutputDescriptor::analog("voltage", Unit::Volts),
                            OutputDescriptor::analog("current", Unit::Amps),
                        ],
                    )
                })
                .collect(),
            ProfileKind::Generator => vec![ChannelInfo::new("OUT", Vec::new())],
        }
    }
}

fn dmm_channel() -> ChannelInfo {
    ChannelInfo::new("DMM", vec![OutputDescriptor::analog("voltage", Unit::Volts)])
}

/// SCPI instrument over any [`Transport`].
pub struct ScpiInstrument {
    profile: ModelProfile,
    transport: Box<dyn Transport>,
    identity: Identity,
    channels: Vec<ChannelInfo>,
    settings: BTreeMap<String, ConfigValue>,
    /// Replies to queries that were abandoned; discarded before the next read
    outstanding: usize,
}

impl ScpiInstrument {
    /// Identify the device and build the channel layout.
    pub fn connect(
        profile: ModelProfile,
        mut transport: Box<dyn Transport>,
        timeout: Duration,
    ) -> Result<Self, DriverError> {
        let reply = transport.query("*IDN?", timeout).map_err(|e| match e {
            TransportError::Timeout(_) => DriverError::Unresponsive(format!(
                "no reply to *IDN? within {} ms",
                timeout.as_millis()
            )),
            other => DriverError::Transport(other),
        })?;

        let identity = Identity::parse_idn(&reply)
            .ok_or_else(|| DriverError::ProtocolViolation(format!("malformed *IDN? reply {:?}", reply)))?;
        if !profile.matches(&identity) {
            return Err(DriverError::Unsupported {
                driver: profile.driver.to_string(),
                identity: identity.to_string(),
            });
        }

        let channels = profile.channel_layout(&identity.model);
        tracing::info!(
            "Connected {} via {}:{} ({} channels)",
            identity,
            transport.name(),
            transport.path(),
            channels.len()
        );
        Ok(Self {
            profile,
            transport,
            identity,
            channels,
            settings: BTreeMap::new(),
            outstanding: 0,
        })
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Send `command` and wait for its reply, honouring the timeout and abort signal.
    fn query(
        &mut self,
        command: &str,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<String, AcquisitionError> {
        if abort.is_aborted() {
            return Err(AcquisitionError::Disconnected);
        }
        self.transport
            .send_command(command)
            .map_err(|_| AcquisitionError::Disconnected)?;
        self.outstanding += 1;

        let start = Instant::now();
        let deadline = start + options.timeout;
        loop {
            if abort.is_aborted() {
                return Err(AcquisitionError::Disconnected);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("{} timed out waiting for reply to {}", self.identity.model, command);
                return Err(AcquisitionError::Timeout {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            let slice = options.poll_interval.min(deadline - now);
            match self.transport.receive(slice) {
                Ok(bytes) => {
                    self.outstanding -= 1;
                    if self.outstanding > 0 {
                        // Late reply to an abandoned query
                        continue;
                    }
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    return match text.strip_prefix("ERR") {
                        Some(msg) => Err(AcquisitionError::DeviceFault(msg.trim().to_string())),
                        None => Ok(text),
                    };
                }
                Err(TransportError::Timeout(_)) => continue,
                Err(e) => {
                    tracing::warn!("{} transport failed: {}", self.identity.model, e);
                    return Err(AcquisitionError::Disconnected);
                }
            }
        }
    }

    fn wait_trigger(&mut self, options: &AcquireOptions, abort: &AbortSignal) -> Result<u64, AcquisitionError> {
        let reply = self.query(":TRIG:WAIT?", options, abort)?;
        reply
            .strip_prefix("TRIG ")
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| AcquisitionError::DeviceFault(format!("unexpected trigger reply {:?}", reply)))
    }

    fn read_scalar(
        &mut self,
        command: &str,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<StreamData, AcquisitionError> {
        let reply = self.query(command, options, abort)?;
        let value: f64 = reply
            .parse()
            .map_err(|_| AcquisitionError::DeviceFault(format!("bad reading {:?} for {}", reply, command)))?;
        Ok(StreamData::scalar(value))
    }

    fn read_waveform(
        &mut self,
        channel: &str,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<StreamData, AcquisitionError> {
        let reply = self.query(&format!(":WAV:DATA? {}", channel), options, abort)?;
        parse_waveform(&reply)
            .ok_or_else(|| AcquisitionError::DeviceFault(format!("malformed waveform from {}", channel)))
    }
}

/// `timescale_fs;v1,v2,...`
fn parse_waveform(reply: &str) -> Option<StreamData> {
    let (timescale, body) = reply.split_once(';')?;
    let timescale: i64 = timescale.trim().parse().ok().filter(|ts| *ts > 0)?;
    let samples = if body.trim().is_empty() {
        Vec::new()
    } else {
        body.split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .ok()?
    };
    Some(StreamData::analog(timescale, samples))
}

/// Wire form of a setting value.
fn format_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) => f.to_string(),
        ConfigValue::String(s) => s.clone(),
    }
}

impl InstrumentDriver for ScpiInstrument {
    fn driver_name(&self) -> &str {
        self.profile.driver
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn capabilities(&self) -> CapabilitySet {
        self.profile.capability_set()
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn acquire_waveforms(
        &mut self,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<Acquisition, AcquisitionError> {
        if !self.transport.is_open() {
            return Err(AcquisitionError::Disconnected);
        }
        if self.profile.kind == ProfileKind::Generator {
            return Err(AcquisitionError::DeviceFault(format!(
                "{} is an output-only instrument",
                self.identity.model
            )));
        }

        let sequence = self.wait_trigger(options, abort)?;
        let names: Vec<String> = self.channels.iter().map(|c| c.name.clone()).collect();
        let mut channels = Vec::with_capacity(names.len());
        for name in &names {
            let streams = match (self.profile.kind, name.as_str()) {
                (_, "DMM") => vec![self.read_scalar("MEAS:VOLT?", options, abort)?],
                (ProfileKind::Scope, ch) => vec![self.read_waveform(ch, options, abort)?],
                (ProfileKind::Supply, ch) => vec![
                    self.read_scalar(&format!("MEAS:VOLT? {}", ch), options, abort)?,
                    self.read_scalar(&format!("MEAS:CURR? {}", ch), options, abort)?,
                ],
                _ => Vec::new(),
            };
            channels.push(streams);
        }

        tracing::trace!("{} acquisition {} complete", self.identity.model, sequence);
        Ok(Acquisition {
            sequence,
            timestamp: chrono::Utc::now(),
            channels,
        })
    }

    fn configure(&mut self, key: &str, value: &ConfigValue) -> Result<(), DriverError> {
        let invalid = |reason: &str| DriverError::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if key.is_empty() || key.chars().any(char::is_whitespace) {
            return Err(invalid("keys must be non-empty and contain no whitespace"));
        }
        let wire = format_value(value);
        if wire.contains('\n') {
            return Err(invalid("values must be a single line"));
        }

        let key = key.to_ascii_uppercase();
        self.transport.send_command(&format!("SET {} {}", key, wire))?;
        tracing::debug!("{}: {} = {}", self.identity.model, key, wire);
        self.settings.insert(key, value.clone());
        Ok(())
    }

    fn settings(&self) -> BTreeMap<String, ConfigValue> {
        self.settings.clone()
    }

    fn disconnect(&mut self) {
        if self.transport.is_open() {
            self.transport.close();
            tracing::info!("Disconnected {}", self.identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WaveformData;
    use crate::instrument::abort_pair;
    use crate::transport::SimTransport;

    fn sim(path: &str) -> Box<dyn Transport> {
        Box::new(SimTransport::from_path(path).unwrap())
    }

    fn connect(profile: ModelProfile, path: &str) -> Result<ScpiInstrument, DriverError> {
        ScpiInstrument::connect(profile, sim(path), Duration::from_millis(50))
    }

    fn fast() -> AcquireOptions {
        AcquireOptions {
            timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_scope_layout_and_acquire() {
        let mut scope = connect(ModelProfile::SIM_SCOPE, "SIMSCOPE-2:pattern=dc:points=8:trigger_ms=1").unwrap();
        let names: Vec<_> = scope.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["CH1", "CH2", "DMM"]);
        assert!(scope.capabilities().contains(Capability::Multimeter));

        let acq = scope.acquire_waveforms(&fast(), &AbortSignal::never()).unwrap();
        assert_eq!(acq.sequence, 1);
        assert_eq!(acq.channels.len(), 3);
        assert_eq!(acq.channels[0][0].data.len(), 8);
        assert!(matches!(acq.channels[2][0].data, WaveformData::Analog(ref v) if v.len() == 1));
    }

    #[test]
    fn test_configure_reaches_device() {
        let mut scope = connect(ModelProfile::SIM_SCOPE, "SIMSCOPE-1:pattern=dc:points=4:trigger_ms=1").unwrap();
        let before = scope.acquire_waveforms(&fast(), &AbortSignal::never()).unwrap();
        scope.configure("ch1:gain", &ConfigValue::Float(2.0)).unwrap();
        let after = scope.acquire_waveforms(&fast(), &AbortSignal::never()).unwrap();

        let first = |a: &Acquisition| match &a.channels[0][0].data {
            WaveformData::Analog(v) => v[0],
            _ => f64::NAN,
        };
        assert_eq!(first(&after), 2.0 * first(&before));
        assert_eq!(scope.settings().get("CH1:GAIN"), Some(&ConfigValue::Float(2.0)));
        assert!(scope.configure("bad key", &ConfigValue::Int(1)).is_err());
    }

    #[test]
    fn test_supply_has_multi_stream_channels() {
        let mut psu = connect(ModelProfile::SIM_PSU, "SIMPSU-2:trigger_ms=1").unwrap();
        assert_eq!(psu.channels()[0].streams.len(), 2);
        psu.configure("CH1:VOLT", &ConfigValue::Float(12.0)).unwrap();
        let acq = psu.acquire_waveforms(&fast(), &AbortSignal::never()).unwrap();
        assert_eq!(acq.channels[0][0], StreamData::scalar(12.0));
        assert_eq!(acq.channels[0][1], StreamData::scalar(1.2));
    }

    #[test]
    fn test_identification_errors() {
        assert!(matches!(
            connect(ModelProfile::SIM_DMM, "SIMSCOPE-4"),
            Err(DriverError::Unsupported { .. })
        ));
        assert!(matches!(
            connect(ModelProfile::SIM_DMM, "SIMDMM:fault=unresponsive"),
            Err(DriverError::Unresponsive(_))
        ));
        assert!(matches!(
            connect(ModelProfile::SIM_DMM, "SIMDMM:fault=garbage"),
            Err(DriverError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_timeout_then_recover() {
        let mut dmm = connect(ModelProfile::SIM_DMM, "SIMDMM:trigger_ms=80").unwrap();
        let short = AcquireOptions {
            timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(2),
        };
        assert!(matches!(
            dmm.acquire_waveforms(&short, &AbortSignal::never()),
            Err(AcquisitionError::Timeout { .. })
        ));
        // The abandoned trigger reply is discarded, not mistaken for this one
        let acq = dmm.acquire_waveforms(&fast(), &AbortSignal::never()).unwrap();
        assert_eq!(acq.sequence, 2);
    }

    #[test]
    fn test_device_fault_and_generators() {
        let mut dmm = connect(ModelProfile::SIM_DMM, "SIMDMM:fault=devicefault").unwrap();
        assert!(matches!(
            dmm.acquire_waveforms(&fast(), &AbortSignal::never()),
            Err(AcquisitionError::DeviceFault(_))
        ));

        let mut awg = connect(ModelProfile::SIM_AWG, "SIMAWG").unwrap();
        assert!(!awg.acquires());
        assert!(awg.acquire_waveforms(&fast(), &AbortSignal::never()).is_err());
    }

    #[test]
    fn test_abort_unblocks_acquisition() {
        let mut scope = connect(ModelProfile::SIM_SCOPE, "SIMSCOPE-1:trigger_ms=5000").unwrap();
        let (handle, signal) = abort_pair();
        let aborter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.abort();
        });
        let start = Instant::now();
        let options = AcquireOptions {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(5),
        };
        assert_eq!(
            scope.acquire_waveforms(&options, &signal),
            Err(AcquisitionError::Disconnected)
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        aborter.join().unwrap();
    }

    #[test]
    fn test_disconnect() {
        let mut dmm = connect(ModelProfile::SIM_DMM, "SIMDMM").unwrap();
        dmm.disconnect();
        assert_eq!(
            dmm.acquire_waveforms(&fast(), &AbortSignal::never()),
            Err(AcquisitionError::Disconnected)
        );
    }

    #[test]
    fn test_parse_waveform() {
        assert_eq!(
            parse_waveform("1000;1,2.5"),
            Some(StreamData::analog(1000, vec![1.0, 2.5]))
        );
        assert!(parse_waveform("0;1").is_none());
        assert!(parse_waveform("10;1,x").is_none());
        assert!(parse_waveform("nonsense").is_none());
    }
}
