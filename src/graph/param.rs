//! Typed configuration values for node parameters and instrument settings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Float(_) => "real",
            ConfigValue::String(_) => "string",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

/// Why a node rejected a parameter change.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("unknown parameter")]
    UnknownKey,

    #[error("expected a {expected} value, got {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    OutOfRange(String),
}

impl ParamError {
    pub fn wrong_type(expected: &'static str, found: &ConfigValue) -> Self {
        ParamError::WrongType {
            expected,
            found: found.type_name(),
        }
    }
}

/// Read a real-valued parameter, accepting integers.
pub fn expect_float(value: &ConfigValue) -> Result<f64, ParamError> {
    value
        .as_float()
        .ok_or_else(|| ParamError::wrong_type("real", value))
}

/// Read a string parameter.
pub fn expect_str(value: &ConfigValue) -> Result<&str, ParamError> {
    value
        .as_str()
        .ok_or_else(|| ParamError::wrong_type("string", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_widens_int() {
        assert_eq!(ConfigValue::Int(3).as_float(), Some(3.0));
        assert_eq!(ConfigValue::Bool(true).as_float(), None);
    }

    #[test]
    fn test_untagged_serde() {
        let v: Vec<ConfigValue> = serde_json::from_str(r#"[true, 2, 2.5, "x"]"#).unwrap();
        assert_eq!(
            v,
            vec![
                ConfigValue::Bool(true),
                ConfigValue::Int(2),
                ConfigValue::Float(2.5),
                ConfigValue::String("x".into()),
            ]
        );
    }

    #[test]
    fn test_wrong_type_message() {
        let err = expect_float(&ConfigValue::from("abc")).unwrap_err();
        assert_eq!(err.to_string(), "expected a real value, got string");
    }
}
