//! Explicit registry of instrument drivers.
//!
//! Drivers are registered on a registry object before any session uses it;
//! there is no global state. A driver lists every capability family it
//! serves, so a scope with a built-in meter shows up under both.

use super::driver::InstrumentDriver;
use super::error::DriverError;
use super::scpi::{ModelProfile, ScpiInstrument};
use super::{Capability, CapabilitySet};
use crate::transport::{open_transport, Transport, TransportTarget};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Builds a driver on an open transport. The `Duration` bounds identification.
pub type DriverFactory = Arc<
    dyn Fn(Box<dyn Transport>, Duration) -> Result<Box<dyn InstrumentDriver>, DriverError> + Send + Sync,
>;

#[derive(Clone)]
struct DriverEntry {
    capabilities: CapabilitySet,
    factory: DriverFactory,
}

/// Driver name to factory.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverEntry>,
    identify_timeout: Duration,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            drivers: BTreeMap::new(),
            identify_timeout: Duration::from_secs(1),
        }
    }

    /// A registry with the bundled SCPI drivers.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        for profile in ModelProfile::builtin() {
            registry.register_scpi(*profile);
        }
        registry
    }

    pub fn set_identify_timeout(&mut self, timeout: Duration) {
        self.identify_timeout = timeout;
    }

    pub fn identify_timeout(&self) -> Duration {
        self.identify_timeout
    }

    /// Register (or replace) a driver.
    pub fn register<F>(&mut self, name: &str, capabilities: CapabilitySet, factory: F)
    where
        F: Fn(Box<dyn Transport>, Duration) -> Result<Box<dyn InstrumentDriver>, DriverError>
            + Send
            + Sync
            + 'static,
    {
        if self
            .drivers
            .insert(
                name.to_string(),
                DriverEntry {
                    capabilities,
                    factory: Arc::new(factory),
                },
            )
            .is_some()
        {
            tracing::warn!("Driver '{}' registered twice; keeping the later one", name);
        }
    }

    /// Register a [`ScpiInstrument`] for one model profile.
    pub fn register_scpi(&mut self, profile: ModelProfile) {
        self.register(profile.driver, profile.capability_set(), move |transport, timeout| {
            ScpiInstrument::connect(profile, transport, timeout)
                .map(|d| Box::new(d) as Box<dyn InstrumentDriver>)
        });
    }

    /// Drivers serving one capability family.
    pub fn list_drivers(&self, capability: Capability) -> BTreeSet<String> {
        self.drivers
            .iter()
            .filter(|(_, e)| e.capabilities.contains(capability))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Every registered driver name.
    pub fn all_drivers(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    pub fn capabilities_of(&self, driver: &str) -> Option<CapabilitySet> {
        self.drivers.get(driver).map(|e| e.capabilities)
    }

    /// Create a driver on an already open transport.
    pub fn create(&self, driver: &str, transport: Box<dyn Transport>) -> Result<Box<dyn InstrumentDriver>, DriverError> {
        let entry = self
            .drivers
            .get(driver)
            .ok_or_else(|| DriverError::UnknownDriver(driver.to_string()))?;
        (entry.factory)(transport, self.identify_timeout)
    }

    /// Open the target's transport and create its driver.
    pub fn connect(&self, target: &TransportTarget) -> Result<Box<dyn InstrumentDriver>, DriverError> {
        if !self.drivers.contains_key(&target.driver) {
            return Err(DriverError::UnknownDriver(target.driver.clone()));
        }
        let transport = open_transport(target)?;
        self.create(&target.driver, transport)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin_drivers()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("identify_timeout", &self.identify_timeout)
            .finish()
    }
}
