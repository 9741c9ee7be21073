//! Test data builders for creating test objects

use scopegraph::graph::{ConfigValue, OutputDescriptor, StreamData, Unit};
use scopegraph::instrument::{
    AbortSignal, AcquireOptions, Acquisition, AcquisitionError, ChannelInfo, DriverError, Identity,
};
use scopegraph::{Capability, CapabilitySet, InstrumentDriver};
use std::collections::BTreeMap;
use std::time::Duration;

/// In-memory instrument that returns the same samples on every trigger.
pub struct StaticDriver {
    identity: Identity,
    capabilities: CapabilitySet,
    channels: Vec<ChannelInfo>,
    samples: Vec<Vec<f64>>,
    timescale_fs: i64,
    trigger_interval: Duration,
    sequence: u64,
    settings: BTreeMap<String, ConfigValue>,
    connected: bool,
}

impl InstrumentDriver for StaticDriver {
    fn driver_name(&self) -> &str {
        "static"
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    fn acquire_waveforms(
        &mut self,
        options: &AcquireOptions,
        abort: &AbortSignal,
    ) -> Result<Acquisition, AcquisitionError> {
        if !self.connected {
            return Err(AcquisitionError::Disconnected);
        }
        if self.trigger_interval > options.timeout {
            if abort.wait(options.timeout) {
                return Err(AcquisitionError::Disconnected);
            }
            return Err(AcquisitionError::Timeout {
                waited_ms: options.timeout.as_millis() as u64,
            });
        }
        if !self.trigger_interval.is_zero() && abort.wait(self.trigger_interval) {
            return Err(AcquisitionError::Disconnected);
        }
        self.sequence += 1;
        Ok(Acquisition {
            sequence: self.sequence,
            timestamp: chrono::Utc::now(),
            channels: self
                .samples
                .iter()
                .map(|s| vec![StreamData::analog(self.timescale_fs, s.clone())])
                .collect(),
        })
    }

    fn configure(&mut self, key: &str, value: &ConfigValue) -> Result<(), DriverError> {
        self.settings.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn settings(&self) -> BTreeMap<String, ConfigValue> {
        self.settings.clone()
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Builder for [`StaticDriver`]
pub struct StaticDriverBuilder {
    model: String,
    capabilities: CapabilitySet,
    samples: Vec<Vec<f64>>,
    timescale_fs: i64,
    trigger_interval: Duration,
}

impl StaticDriverBuilder {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            capabilities: CapabilitySet::of(&[Capability::Oscilloscope]),
            samples: Vec::new(),
            timescale_fs: super::US,
            trigger_interval: Duration::from_millis(1),
        }
    }

    /// Add one analog channel returning `samples` on every trigger.
    pub fn channel(mut self, samples: &[f64]) -> Self {
        self.samples.push(samples.to_vec());
        self
    }

    pub fn capabilities(mut self, caps: &[Capability]) -> Self {
        self.capabilities = CapabilitySet::of(caps);
        self
    }

    pub fn timescale_fs(mut self, timescale_fs: i64) -> Self {
        self.timescale_fs = timescale_fs;
        self
    }

    pub fn trigger_interval(mut self, interval: Duration) -> Self {
        self.trigger_interval = interval;
        self
    }

    pub fn build(self) -> StaticDriver {
        let channels = (0..self.samples.len())
            .map(|i| ChannelInfo::new(format!("CH{}", i + 1), vec![OutputDescriptor::analog("v", Unit::Volts)]))
            .collect();
        StaticDriver {
            identity: Identity {
                vendor: "TEST".to_string(),
                model: self.model,
                serial: "0001".to_string(),
                firmware: "1.0".to_string(),
            },
            capabilities: self.capabilities,
            channels,
            samples: self.samples,
            timescale_fs: self.timescale_fs,
            trigger_interval: self.trigger_interval,
            sequence: 0,
            settings: BTreeMap::new(),
            connected: true,
        }
    }

    pub fn boxed(self) -> Box<dyn InstrumentDriver> {
        Box::new(self.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_driver_builder() {
        let mut driver = StaticDriverBuilder::new("S1")
            .channel(&[1.0, 2.0])
            .channel(&[3.0])
            .trigger_interval(Duration::ZERO)
            .build();

        assert_eq!(driver.channels().len(), 2);
        let acq = driver
            .acquire_waveforms(&AcquireOptions::default(), &AbortSignal::never())
            .unwrap();
        assert_eq!(acq.sequence, 1);
        assert_eq!(acq.channels.len(), 2);
    }
}
