//! Conversion between reading batches and the script's native data shape
//!
//! A batch crosses the language boundary as an array of single-key object
//! maps. The key is the asset name; the value holds the datapoints and the
//! reading's timestamp:
//!
//! ```rhai
//! [
//!     #{ "sensorA": #{ readings: #{ temperature: 21.5 }, timestamp: "2024-01-01T00:00:00.000Z" } },
//!     #{ "pump": #{ readings: #{ flow: 3 }, timestamp: "2024-01-01T00:00:01.250Z" } },
//! ]
//! ```
//!
//! Scripts return the same shape. The return value is validated strictly:
//! every element must be a map with exactly one key, and both `readings`
//! and `timestamp` must be present and well formed. Any malformed element
//! fails the whole conversion, so the caller can fall back to the original
//! batch instead of forwarding a partial one.
//!
//! Native values built here are transient. They are created and consumed
//! within the caller's execution-lock scope and never retained.

mod value;

pub use value::{
    datapoint_to_dynamic, datapoints_to_map, dynamic_to_datapoint, dynamic_to_json,
    json_to_dynamic, map_to_datapoints,
};

use crate::error::{FilterError, Result};
use crate::types::{Reading, ReadingSet};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rhai::{Array, Dynamic, Map};

/// Key of the datapoint map inside a reading's native form
pub const READINGS_KEY: &str = "readings";

/// Key of the timestamp text inside a reading's native form
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Convert a batch into the script's native form, preserving order.
pub fn to_native(batch: &ReadingSet) -> Result<Array> {
    batch
        .iter()
        .enumerate()
        .map(|(index, reading)| reading_to_native(reading).map_err(|e| {
            FilterError::Marshal(format!(
                "reading {index} (asset '{}'): {e}",
                reading.asset
            ))
        }))
        .collect()
}

fn reading_to_native(reading: &Reading) -> std::result::Result<Dynamic, String> {
    let datapoints = value::datapoints_to_map(&reading.readings)
        .map_err(|type_name| format!("unsupported datapoint type '{type_name}'"))?;

    let mut body = Map::new();
    body.insert(READINGS_KEY.into(), Dynamic::from_map(datapoints));
    body.insert(
        TIMESTAMP_KEY.into(),
        Dynamic::from(format_timestamp(&reading.timestamp)),
    );

    let mut element = Map::new();
    element.insert(reading.asset.as_str().into(), Dynamic::from_map(body));
    Ok(Dynamic::from_map(element))
}

/// Convert a script result back into a batch.
///
/// Either every element converts or the whole result is rejected.
pub fn from_native(result: Dynamic) -> Result<ReadingSet> {
    let result = result.flatten();
    let type_name = result.type_name();
    let elements = result.try_cast::<Array>().ok_or_else(|| {
        FilterError::Marshal(format!(
            "script must return an array of readings, found '{type_name}'"
        ))
    })?;

    let mut readings = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        let reading = reading_from_native(element)
            .map_err(|e| FilterError::Marshal(format!("returned element {index}: {e}")))?;
        readings.push(reading);
    }
    Ok(ReadingSet::new(readings))
}

fn reading_from_native(element: Dynamic) -> std::result::Result<Reading, String> {
    let element = element.flatten();
    let type_name = element.type_name();
    let element = element
        .try_cast::<Map>()
        .ok_or_else(|| format!("expected a map, found '{type_name}'"))?;

    if element.len() != 1 {
        return Err(format!(
            "expected exactly one asset key, found {}",
            element.len()
        ));
    }
    let (asset, body) = element
        .into_iter()
        .next()
        .ok_or_else(|| "empty element".to_string())?;

    let body = body.flatten();
    let body = body
        .try_cast::<Map>()
        .ok_or_else(|| format!("asset '{asset}': value must be a map"))?;

    let timestamp = body
        .get(TIMESTAMP_KEY)
        .ok_or_else(|| format!("asset '{asset}': missing '{TIMESTAMP_KEY}'"))?
        .flatten_clone()
        .into_string()
        .map_err(|t| format!("asset '{asset}': timestamp must be a string, found '{t}'"))?;
    let timestamp = parse_timestamp(&timestamp)
        .ok_or_else(|| format!("asset '{asset}': invalid timestamp '{timestamp}'"))?;

    let datapoints = body
        .get(READINGS_KEY)
        .ok_or_else(|| format!("asset '{asset}': missing '{READINGS_KEY}'"))?
        .flatten_clone()
        .try_cast::<Map>()
        .ok_or_else(|| format!("asset '{asset}': '{READINGS_KEY}' must be a map"))?;
    let datapoints =
        value::map_to_datapoints(datapoints).map_err(|e| format!("asset '{asset}': {e}"))?;

    Ok(Reading {
        asset: asset.to_string(),
        timestamp,
        readings: datapoints,
    })
}

/// Format a timestamp as ISO-8601 UTC with a `Z` marker.
///
/// At least millisecond digits are written; finer precision is kept when
/// the timestamp carries it.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    let nanos = timestamp.timestamp_subsec_nanos();
    let precision = if nanos % 1_000_000 == 0 {
        SecondsFormat::Millis
    } else if nanos % 1_000 == 0 {
        SecondsFormat::Micros
    } else {
        SecondsFormat::Nanos
    };
    timestamp.to_rfc3339_opts(precision, true)
}

/// Parse a timestamp produced by [`format_timestamp`] or by a script.
///
/// Accepts RFC 3339 text with any offset, and the space-separated
/// `YYYY-MM-DD HH:MM:SS[.fff][+HH:MM]` form.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ts| ts.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatapointValue;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn sample_batch() -> ReadingSet {
        ReadingSet::new(vec![
            Reading::new("sensorA", ts()).with_datapoint("temperature", 21.5),
            Reading::new("pump", ts() + chrono::Duration::milliseconds(1250))
                .with_datapoint("flow", 3i64)
                .with_datapoint("label", "north"),
        ])
    }

    #[test]
    fn test_native_shape() {
        let native = to_native(&sample_batch()).unwrap();
        assert_eq!(native.len(), 2);

        let first = native[0].clone().try_cast::<Map>().unwrap();
        assert_eq!(first.len(), 1);
        let body = first.get("sensorA").unwrap().clone().try_cast::<Map>().unwrap();
        assert_eq!(
            body.get(TIMESTAMP_KEY).unwrap().clone().into_string().unwrap(),
            "2024-01-01T00:00:00.000Z"
        );
        let readings = body.get(READINGS_KEY).unwrap().clone().try_cast::<Map>().unwrap();
        assert_eq!(readings.get("temperature").unwrap().as_float().unwrap(), 21.5);
    }

    #[test]
    fn test_round_trip_preserves_order_and_content() {
        let batch = sample_batch();
        let native = to_native(&batch).unwrap();
        let back = from_native(Dynamic::from_array(native)).unwrap();
        assert_eq!(back, batch);
        assert_eq!(back.readings()[0].asset, "sensorA");
        assert_eq!(back.readings()[1].asset, "pump");
    }

    #[test]
    fn test_unsupported_value_fails_whole_batch() {
        let mut batch = sample_batch().into_readings();
        batch.push(Reading::new("camera", ts()).with_datapoint(
            "frame",
            DatapointValue::Buffer {
                item_size: 1,
                data: vec![0; 4],
            },
        ));
        let err = to_native(&ReadingSet::new(batch)).unwrap_err();
        assert!(matches!(err, FilterError::Marshal(_)));
        assert!(err.to_string().contains("camera"));
    }

    #[test]
    fn test_result_must_be_array() {
        assert!(from_native(Dynamic::from_int(3)).is_err());
        assert!(from_native(Dynamic::UNIT).is_err());
        assert_eq!(from_native(Dynamic::from_array(Array::new())).unwrap().len(), 0);
    }

    #[test]
    fn test_result_elements_must_have_one_key() {
        let mut native = to_native(&sample_batch()).unwrap();
        let mut two_keys = native[0].clone().try_cast::<Map>().unwrap();
        two_keys.insert("other".into(), Dynamic::from_map(Map::new()));
        native.push(Dynamic::from_map(two_keys));

        let err = from_native(Dynamic::from_array(native)).unwrap_err();
        assert!(err.to_string().contains("element 2"));
    }

    #[test]
    fn test_result_missing_timestamp_rejected() {
        let mut body = Map::new();
        let mut readings = Map::new();
        readings.insert("v".into(), Dynamic::from_int(1));
        body.insert(READINGS_KEY.into(), Dynamic::from_map(readings));
        let mut element = Map::new();
        element.insert("a".into(), Dynamic::from_map(body));

        let err = from_native(Dynamic::from_array(vec![Dynamic::from_map(element)])).unwrap_err();
        assert!(err.to_string().contains("missing 'timestamp'"));
    }

    #[test]
    fn test_timestamp_precision() {
        let micros = ts() + chrono::Duration::microseconds(123_456);
        assert_eq!(format_timestamp(&micros), "2024-01-01T00:00:00.123456Z");
        let nanos = ts() + chrono::Duration::nanoseconds(5);
        assert_eq!(format_timestamp(&nanos), "2024-01-01T00:00:00.000000005Z");
        assert_eq!(parse_timestamp(&format_timestamp(&micros)), Some(micros));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(parse_timestamp("2024-01-01T01:00:00+01:00"), Some(ts()));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00.000000+00:00"), Some(ts()));
        assert_eq!(parse_timestamp("2024-01-01 00:00:00"), Some(ts()));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    fn arb_value() -> impl Strategy<Value = DatapointValue> {
        prop_oneof![
            any::<i64>().prop_map(DatapointValue::Integer),
            (-1.0e9f64..1.0e9).prop_map(DatapointValue::Float),
            "[a-z]{0,8}".prop_map(DatapointValue::String),
            prop::collection::vec(-1.0e6f64..1.0e6, 0..4).prop_map(DatapointValue::FloatArray),
            prop::collection::vec(prop::collection::vec(-1.0e6f64..1.0e6, 0..3), 0..3)
                .prop_map(DatapointValue::FloatArray2D),
        ]
    }

    fn arb_reading() -> impl Strategy<Value = Reading> {
        (
            "[a-z][a-z0-9]{0,6}",
            0i64..4_000_000_000,
            0u32..1_000_000,
            prop::collection::vec(("[a-z]{1,6}", arb_value()), 0..5),
        )
            .prop_map(|(asset, secs, micros, points)| {
                let timestamp = Utc.timestamp_opt(secs, micros * 1_000).unwrap();
                let mut reading = Reading::new(asset, timestamp);
                for (name, value) in points {
                    reading.readings.insert(name, value);
                }
                reading
            })
    }

    proptest! {
        #[test]
        fn test_to_native_then_from_native_is_identity(
            readings in prop::collection::vec(arb_reading(), 0..6)
        ) {
            let batch = ReadingSet::new(readings);
            let has_empty_grid = batch
                .iter()
                .flat_map(|r| r.readings.values())
                .any(|v| matches!(v, DatapointValue::FloatArray2D(rows) if rows.is_empty()));

            match to_native(&batch) {
                // Marshaled batches come back element-wise equal
                Ok(native) => {
                    prop_assert!(!has_empty_grid);
                    let back = from_native(Dynamic::from_array(native)).unwrap();
                    prop_assert_eq!(back, batch);
                }
                Err(e) => {
                    prop_assert!(has_empty_grid, "unexpected marshal failure: {}", e);
                }
            }
        }
    }
}
