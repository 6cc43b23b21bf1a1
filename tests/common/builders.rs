//! Test data builders for readings and configuration

use chrono::{DateTime, TimeZone, Utc};
use script_filter::config::{default_category, CONFIG_ITEM, ENABLE_ITEM, SCRIPT_ITEM};
use script_filter::{ConfigCategory, DatapointValue, Reading, ReadingSet};
use serde_json::{json, Value};

/// A fixed timestamp with microsecond precision
pub fn test_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 0).unwrap() + chrono::Duration::microseconds(123_456)
}

/// Builder for creating test Readings
pub struct ReadingBuilder {
    asset: String,
    timestamp: DateTime<Utc>,
    datapoints: Vec<(String, DatapointValue)>,
}

impl ReadingBuilder {
    pub fn new(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            timestamp: test_timestamp(),
            datapoints: Vec::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn datapoint(mut self, name: &str, value: impl Into<DatapointValue>) -> Self {
        self.datapoints.push((name.to_string(), value.into()));
        self
    }

    pub fn build(self) -> Reading {
        self.datapoints
            .into_iter()
            .fold(Reading::new(self.asset, self.timestamp), |reading, (name, value)| {
                reading.with_datapoint(name, value)
            })
    }
}

/// The canonical single-reading batch: `sensorA` at 21.5 degrees
pub fn temperature_batch(temperature: f64) -> ReadingSet {
    ReadingSet::new(vec![ReadingBuilder::new("sensorA")
        .datapoint("temperature", temperature)
        .build()])
}

/// A batch of `size` readings spread over a few assets
pub fn mixed_batch(size: usize) -> ReadingSet {
    (0..size)
        .map(|i| {
            ReadingBuilder::new(&format!("sensor{}", i % 3))
                .timestamp(test_timestamp() + chrono::Duration::milliseconds(i as i64))
                .datapoint("temperature", 20.0 + i as f64)
                .datapoint("count", i as i64)
                .build()
        })
        .collect::<Vec<_>>()
        .into()
}

/// Builder for filter configuration categories
pub struct CategoryBuilder {
    name: String,
    enable: Value,
    script: String,
    config: Value,
}

impl CategoryBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enable: json!("true"),
            script: String::new(),
            config: json!("{}"),
        }
    }

    pub fn script(mut self, script: &str) -> Self {
        self.script = script.to_string();
        self
    }

    pub fn enable(mut self, enable: bool) -> Self {
        self.enable = json!(enable.to_string());
        self
    }

    /// Raw `enable` value, for malformed configurations
    pub fn enable_value(mut self, enable: Value) -> Self {
        self.enable = enable;
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = Value::String(config.to_string());
        self
    }

    pub fn build(self) -> ConfigCategory {
        default_category(self.name)
            .with_value(ENABLE_ITEM, self.enable)
            .with_value(SCRIPT_ITEM, json!(self.script))
            .with_value(CONFIG_ITEM, self.config)
    }
}

/// Reconfiguration text in the host's item-object form
pub fn reconfig_text(enable: bool, script: &str, config: Value) -> String {
    json!({
        "enable": { "value": enable.to_string() },
        "script": { "value": script },
        "config": { "value": config.to_string() },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_filter::FilterConfig;

    #[test]
    fn test_reading_builder() {
        let reading = ReadingBuilder::new("pump")
            .datapoint("flow", 1.5)
            .datapoint("count", 2i64)
            .build();
        assert_eq!(reading.asset, "pump");
        assert_eq!(reading.readings.len(), 2);
        assert_eq!(reading.timestamp, test_timestamp());
    }

    #[test]
    fn test_category_builder() {
        let category = CategoryBuilder::new("unit")
            .script("scale")
            .config(json!({"factor": 3}))
            .build();
        let config = FilterConfig::from_category(&category).unwrap();
        assert!(config.is_active());
        assert_eq!(config.script_config, r#"{"factor":3}"#);
    }

    #[test]
    fn test_reconfig_text_parses() {
        let config =
            FilterConfig::parse_strict(&reconfig_text(false, "scale", json!({}))).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.script_name, "scale");
    }
}
