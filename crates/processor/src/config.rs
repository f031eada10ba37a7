//! Stage configuration: user overrides merged over stage-declared
//! defaults.
//!
//! Configuration-file parsing lives outside the runtime; a stage only
//! sees a YAML mapping. Constructors declare their defaults and merge the
//! caller's overrides on top.

use serde_yaml::{Mapping, Value};

/// The effective configuration of a stage.
pub struct StageConfig {
    values: Mapping,
}

impl StageConfig {
    /// Merges `overrides` over `defaults` and returns the effective
    /// configuration.
    pub fn new(defaults: Mapping, overrides: Option<Mapping>) -> Self {
        let mut values = defaults;
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                let _ = values.insert(key, value);
            }
        }
        Self { values }
    }

    /// Returns the raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(&Value::String(key.to_string()))
    }

    /// Returns the string value stored under `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Returns the integer value stored under `key`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Returns the float value stored under `key`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Returns the boolean value stored under `key`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }
}

/// Builds a YAML mapping from string keys and values, a shorthand for
/// declaring stage defaults.
pub fn mapping<I, V>(entries: I) -> Mapping
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: Into<Value>,
{
    let mut values = Mapping::new();
    for (key, value) in entries {
        let _ = values.insert(Value::String(key.to_string()), value.into());
    }
    values
}
