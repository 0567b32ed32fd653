//! Typed broker arguments.
//!
//! Queue-declare and queue-bind arguments arrive from configuration as strings.
//! Each value is coerced to the first type that accepts it: boolean, 32-bit
//! integer, finite floating point, and otherwise string.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A single coerced argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentValue {
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
}

impl ArgumentValue {
    /// Coerce a raw configuration string
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();

        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(value) = trimmed.parse::<i32>() {
            return Self::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return Self::Float(value);
            }
        }

        Self::String(raw.to_string())
    }
}

impl fmt::Display for ArgumentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// Ordered set of coerced arguments
///
/// Ordered so that declarations are deterministic across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerArguments(BTreeMap<String, ArgumentValue>);

impl BrokerArguments {
    pub fn from_raw(raw: &HashMap<String, String>) -> Self {
        Self(
            raw.iter()
                .map(|(key, value)| (key.clone(), ArgumentValue::coerce(value)))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ArgumentValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&ArgumentValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArgumentValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, ArgumentValue)> for BrokerArguments {
    fn from_iter<T: IntoIterator<Item = (String, ArgumentValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
