//! Value-level conversions between host values and Rhai `Dynamic`s.

use crate::types::{DatapointValue, Datapoints};
use rhai::{Array, Dynamic, Map, FLOAT, INT};
use serde_json::Value;

/// Reported for a `FloatArray2D` with no rows
const EMPTY_GRID: &str = "empty 2D float array";

/// Convert one datapoint value into its script-side form.
///
/// Returns the value's type name when it has no native representation
/// that reads back as the same value.
pub fn datapoint_to_dynamic(value: &DatapointValue) -> Result<Dynamic, &'static str> {
    let native = match value {
        DatapointValue::Integer(i) => Dynamic::from_int(*i as INT),
        DatapointValue::Float(f) => Dynamic::from_float(*f as FLOAT),
        DatapointValue::String(s) => Dynamic::from(s.clone()),
        DatapointValue::FloatArray(values) => Dynamic::from_array(float_array(values)),
        // An empty grid would read back as an empty 1D array
        DatapointValue::FloatArray2D(rows) if rows.is_empty() => return Err(EMPTY_GRID),
        DatapointValue::FloatArray2D(rows) => Dynamic::from_array(
            rows.iter()
                .map(|row| Dynamic::from_array(float_array(row)))
                .collect(),
        ),
        DatapointValue::Dict(nested) => Dynamic::from_map(datapoints_to_map(nested)?),
        DatapointValue::Buffer { .. } => return Err(value.type_name()),
    };
    Ok(native)
}

fn float_array(values: &[f64]) -> Array {
    values.iter().map(|v| Dynamic::from_float(*v as FLOAT)).collect()
}

/// Convert a datapoint map into a Rhai object map.
pub fn datapoints_to_map(datapoints: &Datapoints) -> Result<Map, &'static str> {
    let mut map = Map::new();
    for (name, value) in datapoints {
        map.insert(name.as_str().into(), datapoint_to_dynamic(value)?);
    }
    Ok(map)
}

/// Convert a script-side value back into a datapoint value.
///
/// The error string describes what made the value unusable.
pub fn dynamic_to_datapoint(value: Dynamic) -> Result<DatapointValue, String> {
    let value = value.flatten();

    if value.is_int() {
        return value
            .as_int()
            .map(|i| DatapointValue::Integer(i as i64))
            .map_err(|t| format!("expected integer, found {t}"));
    }
    if value.is_float() {
        return value
            .as_float()
            .map(|f| DatapointValue::Float(f as f64))
            .map_err(|t| format!("expected float, found {t}"));
    }
    if value.is_bool() {
        return value
            .as_bool()
            .map(|b| DatapointValue::Integer(b as i64))
            .map_err(|t| format!("expected bool, found {t}"));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(DatapointValue::String)
            .map_err(|t| format!("expected string, found {t}"));
    }
    if value.is_array() {
        let items = value
            .try_cast::<Array>()
            .ok_or_else(|| "array could not be read".to_string())?;
        return array_to_datapoint(items);
    }
    if value.is_map() {
        let map = value
            .try_cast::<Map>()
            .ok_or_else(|| "map could not be read".to_string())?;
        return map_to_datapoints(map).map(DatapointValue::Dict);
    }

    Err(format!("unsupported value type '{}'", value.type_name()))
}

/// Convert a Rhai object map into datapoints.
pub fn map_to_datapoints(map: Map) -> Result<Datapoints, String> {
    let mut datapoints = Datapoints::with_capacity(map.len());
    for (name, value) in map {
        let converted =
            dynamic_to_datapoint(value).map_err(|e| format!("datapoint '{name}': {e}"))?;
        datapoints.insert(name.to_string(), converted);
    }
    Ok(datapoints)
}

fn number(value: &Dynamic) -> Option<f64> {
    if let Ok(i) = value.as_int() {
        Some(i as f64)
    } else {
        value.as_float().ok().map(|f| f as f64)
    }
}

fn number_row(items: &[Dynamic]) -> Option<Vec<f64>> {
    items.iter().map(number).collect()
}

fn array_to_datapoint(items: Array) -> Result<DatapointValue, String> {
    let items: Array = items.into_iter().map(Dynamic::flatten).collect();

    if let Some(row) = number_row(&items) {
        return Ok(DatapointValue::FloatArray(row));
    }

    let rows: Option<Vec<Vec<f64>>> = items
        .iter()
        .map(|item| {
            item.read_lock::<Array>()
                .and_then(|row| number_row(&row))
        })
        .collect();

    rows.map(DatapointValue::FloatArray2D)
        .ok_or_else(|| "arrays must hold only numbers or only arrays of numbers".to_string())
}

/// Convert parsed JSON into a script value. `null` becomes `()`.
pub fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i as INT),
            None => Dynamic::from_float(n.as_f64().unwrap_or(f64::NAN) as FLOAT),
        },
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => {
            Dynamic::from_array(items.into_iter().map(json_to_dynamic).collect())
        }
        Value::Object(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from_map(map)
        }
    }
}

/// Convert a script value into JSON, if it has a JSON form.
pub fn dynamic_to_json(value: &Dynamic) -> Option<Value> {
    let value = value.flatten_clone();

    if value.is_unit() {
        return Some(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Some(Value::from(i as i64));
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f as f64).map(Value::Number);
    }
    if value.is_string() {
        return value.into_string().ok().map(Value::String);
    }
    if value.is_array() {
        let items = value.try_cast::<Array>()?;
        return items
            .iter()
            .map(dynamic_to_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array);
    }
    if value.is_map() {
        let map = value.try_cast::<Map>()?;
        let mut object = serde_json::Map::new();
        for (k, v) in &map {
            object.insert(k.to_string(), dynamic_to_json(v)?);
        }
        return Some(Value::Object(object));
    }
    None
}
