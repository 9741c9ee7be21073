//! Typed preference tree addressed by dotted paths.
//!
//! Instrument defaults live under `instrument.`:
//!
//! ```toml
//! [instrument.defaults]
//! timeout_ms = 500
//!
//! [instrument.oscilloscope]
//! "ch1:gain" = 1.0
//!
//! [instrument.driver.sim_psu]
//! "ch1:volt" = 5.0
//! ```

use super::ConfigError;
use crate::graph::ConfigValue;
use crate::instrument::CapabilitySet;
use std::collections::BTreeMap;
use std::path::Path;

/// Read-only preference store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preferences {
    values: BTreeMap<String, ConfigValue>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a TOML table into dotted paths. Arrays and datetimes are skipped.
    pub fn from_table(table: &toml::Table) -> Self {
        let mut prefs = Self::new();
        flatten(table, "", &mut prefs.values);
        prefs
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse()?;
        Ok(Self::from_table(&table))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let prefs = Self::from_toml(&content)?;
        tracing::debug!("Loaded {} preference(s) from {:?}", prefs.len(), path);
        Ok(prefs)
    }

    pub fn set(&mut self, path: &str, value: impl Into<ConfigValue>) {
        self.values.insert(path.to_string(), value.into());
    }

    pub fn get(&self, path: &str) -> Option<&ConfigValue> {
        self.values.get(path)
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(ConfigValue::as_int)
    }

    /// Reals accept integer values too.
    pub fn get_real(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(ConfigValue::as_float)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(ConfigValue::as_bool)
    }

    pub fn get_string(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(ConfigValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries directly below `prefix`, keyed by the remainder of the path.
    pub fn section(&self, prefix: &str) -> BTreeMap<String, ConfigValue> {
        let prefix = format!("{}.", prefix);
        self.values
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect()
    }

    /// Settings to apply to a newly connected instrument.
    ///
    /// Layers are `instrument.defaults`, then `instrument.<family>` for every
    /// capability the instrument has, then `instrument.driver.<driver>`.
    /// Later layers override earlier ones.
    pub fn instrument_defaults(&self, driver: &str, capabilities: CapabilitySet) -> BTreeMap<String, ConfigValue> {
        let mut settings = self.section("instrument.defaults");
        for capability in capabilities.iter() {
            settings.extend(self.section(&format!("instrument.{}", capability.family_name())));
        }
        settings.extend(self.section(&format!("instrument.driver.{}", driver)));
        settings
    }
}

fn flatten(table: &toml::Table, prefix: &str, out: &mut BTreeMap<String, ConfigValue>) {
    for (key, value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let leaf = match value {
            toml::Value::Table(inner) => {
                flatten(inner, &path, out);
                continue;
            }
            toml::Value::String(s) => ConfigValue::String(s.clone()),
            toml::Value::Integer(i) => ConfigValue::Int(*i),
            toml::Value::Float(f) => ConfigValue::Float(*f),
            toml::Value::Boolean(b) => ConfigValue::Bool(*b),
            toml::Value::Array(_) | toml::Value::Datetime(_) => {
                tracing::debug!("Ignoring non-scalar preference {}", path);
                continue;
            }
        };
        out.insert(path, leaf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Capability;

    const PREFS: &str = r#"
        [instrument.defaults]
        timeout_ms = 500
        label = "bench"

        [instrument.oscilloscope]
        "ch1:gain" = 1.5
        label = "scope"

        [instrument.multimeter]
        range = "auto"

        [instrument.power_supply]
        "ch1:volt" = 3.3

        [instrument.driver.sim_scope]
        label = "front scope"
    "#;

    #[test]
    fn test_typed_getters() {
        let prefs = Preferences::from_toml(PREFS).unwrap();
        assert_eq!(prefs.get_int("instrument.defaults.timeout_ms"), Some(500));
        assert_eq!(prefs.get_real("instrument.defaults.timeout_ms"), Some(500.0));
        assert_eq!(prefs.get_string("instrument.multimeter.range"), Some("auto"));
        assert_eq!(prefs.get_bool("instrument.multimeter.range"), None);
        assert!(prefs.get("instrument.missing").is_none());
    }

    #[test]
    fn test_defaults_layer_by_family_then_driver() {
        let prefs = Preferences::from_toml(PREFS).unwrap();
        let caps = CapabilitySet::of(&[Capability::Oscilloscope, Capability::Multimeter]);
        let settings = prefs.instrument_defaults("sim_scope", caps);
        assert_eq!(settings.get("label"), Some(&ConfigValue::from("front scope")));
        assert_eq!(settings.get("ch1:gain"), Some(&ConfigValue::Float(1.5)));
        assert_eq!(settings.get("range"), Some(&ConfigValue::from("auto")));
        assert_eq!(settings.get("timeout_ms"), Some(&ConfigValue::Int(500)));
        assert!(!settings.contains_key("ch1:volt"));
    }

    #[test]
    fn test_every_family_gets_defaults() {
        let prefs = Preferences::from_toml(PREFS).unwrap();
        for capability in Capability::all() {
            let settings = prefs.instrument_defaults("other", CapabilitySet::of(&[*capability]));
            assert_eq!(settings.get("timeout_ms"), Some(&ConfigValue::Int(500)), "{}", capability);
        }
        let psu = prefs.instrument_defaults("sim_psu", CapabilitySet::of(&[Capability::PowerSupply]));
        assert_eq!(psu.get("ch1:volt"), Some(&ConfigValue::Float(3.3)));
        assert_eq!(psu.get("label"), Some(&ConfigValue::from("bench")));
    }

    #[test]
    fn test_section_does_not_leak_siblings() {
        let mut prefs = Preferences::new();
        prefs.set("a.b", 1i64);
        prefs.set("a.bc", 2i64);
        prefs.set("ab.c", 3i64);
        let section = prefs.section("a");
        assert_eq!(section.len(), 2);
        assert!(section.contains_key("b"));
        assert!(section.contains_key("bc"));
    }
}
