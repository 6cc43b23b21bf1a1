//! Core data types for the script filter
//!
//! This module contains the host-side representation of the data flowing
//! through the filter stage.
//!
//! # Main Types
//!
//! - [`DatapointValue`] - A typed measurement value (numeric, string, arrays, nested)
//! - [`Reading`] - One timestamped, named set of measurements for an asset
//! - [`ReadingSet`] - An ordered batch of readings forwarded as a unit
//!
//! # Ownership
//!
//! A [`ReadingSet`] is owned by whoever holds it. The filter either moves the
//! batch it received to the downstream sink untouched, or drops it and hands
//! on a freshly built replacement. It never forwards both.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Datapoint name → value, in insertion order
pub type Datapoints = IndexMap<String, DatapointValue>;

/// A single measurement value
///
/// Deserialization is untagged so that plain JSON readings
/// (`{"temperature": 21.5}`) map onto the natural variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    /// Signed integer
    Integer(i64),
    /// Floating point number
    Float(f64),
    /// Text
    String(String),
    /// One-dimensional numeric array
    FloatArray(Vec<f64>),
    /// Two-dimensional numeric array
    FloatArray2D(Vec<Vec<f64>>),
    /// Raw binary buffer; has no script-side representation
    Buffer { item_size: usize, data: Vec<u8> },
    /// Nested datapoints
    Dict(Datapoints),
}

impl DatapointValue {
    /// Name of the value's type, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            DatapointValue::Integer(_) => "integer",
            DatapointValue::Float(_) => "float",
            DatapointValue::String(_) => "string",
            DatapointValue::FloatArray(_) => "float array",
            DatapointValue::FloatArray2D(_) => "2D float array",
            DatapointValue::Buffer { .. } => "data buffer",
            DatapointValue::Dict(_) => "dict",
        }
    }

    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatapointValue::Integer(i) => Some(*i as f64),
            DatapointValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<i64> for DatapointValue {
    fn from(value: i64) -> Self {
        DatapointValue::Integer(value)
    }
}

impl From<f64> for DatapointValue {
    fn from(value: f64) -> Self {
        DatapointValue::Float(value)
    }
}

impl From<&str> for DatapointValue {
    fn from(value: &str) -> Self {
        DatapointValue::String(value.to_string())
    }
}

impl From<String> for DatapointValue {
    fn from(value: String) -> Self {
        DatapointValue::String(value)
    }
}

impl From<Vec<f64>> for DatapointValue {
    fn from(value: Vec<f64>) -> Self {
        DatapointValue::FloatArray(value)
    }
}

/// One timestamped set of measurements for an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Asset the measurements belong to
    pub asset: String,
    /// When the measurements were taken
    pub timestamp: DateTime<Utc>,
    /// The measurements themselves
    pub readings: Datapoints,
}

impl Reading {
    /// Create a reading with no datapoints
    pub fn new(asset: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            asset: asset.into(),
            timestamp,
            readings: Datapoints::new(),
        }
    }

    /// Builder-style datapoint insertion
    pub fn with_datapoint(mut self, name: impl Into<String>, value: impl Into<DatapointValue>) -> Self {
        self.readings.insert(name.into(), value.into());
        self
    }

    /// Look up a datapoint by name
    pub fn datapoint(&self, name: &str) -> Option<&DatapointValue> {
        self.readings.get(name)
    }

    pub fn asset_name(&self) -> &str {
        &self.asset
    }
}

/// An ordered batch of readings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingSet {
    readings: Vec<Reading>,
}

impl ReadingSet {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self { readings }
    }

    /// All readings, in batch order
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Consume the batch, yielding its readings
    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }
}

impl From<Vec<Reading>> for ReadingSet {
    fn from(readings: Vec<Reading>) -> Self {
        Self::new(readings)
    }
}

impl IntoIterator for ReadingSet {
    type Item = Reading;
    type IntoIter = std::vec::IntoIter<Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.into_iter()
    }
}
