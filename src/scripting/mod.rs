//! Embedded Rhai scripting for the filter stage
//!
//! This module owns everything that touches the interpreter:
//!
//! - [`runtime`] - process-wide interpreter lifecycle, reference counted
//!   across filter instances
//! - [`lock`] - the global execution lock every interpreter access goes
//!   through
//! - [`binding`] - loading a named script and calling its entry points
//!
//! ## Script Contract
//!
//! A filter script named `NAME` lives in `NAME.rhai` in the scripts
//! directory and defines two functions:
//!
//! - `NAME(readings)` - receives the batch as an array of single-key maps,
//!   `#{asset: #{readings: #{...}, timestamp: "..."}}`, and returns an array
//!   of the same shape
//! - `set_filter_config(config)` - receives the filter's JSON configuration
//!   text
//!
//! ## Helper Functions
//!
//! - `parse_json(text)` - parse JSON text into maps, arrays and scalars
//! - `deadband(value, center, width)` - snap values near `center` to it
//! - `clamp(x, min, max)` - limit to a range
//! - `lerp(a, b, t)` - linear interpolation
//! - `map_range(x, in_min, in_max, out_min, out_max)` - rescale a value
//!
//! `print` and `debug` output is routed to the `script` tracing target.

pub mod binding;
pub mod lock;
pub mod runtime;

pub use binding::{is_valid_script_name, ScriptBinding, ScriptLocation};
pub use lock::{ExecutionGuard, ExecutionLock};
pub use runtime::{is_running, live_instances, Interpreter, InterpreterHandle};

/// Starter scripts for common filters
///
/// Templates use `FILTER_NAME` as a placeholder for the filter function;
/// [`builtins::render`] substitutes the real script name.
pub mod builtins {
    const PLACEHOLDER: &str = "FILTER_NAME";

    /// Forwards every reading unchanged
    pub const PASSTHROUGH: &str = r#"
fn set_filter_config(config) {
}

fn FILTER_NAME(readings) {
    readings
}
"#;

    /// Multiplies numeric datapoints by `factor` from the configuration
    pub const SCALE: &str = r#"
fn set_filter_config(config) {
    let parsed = parse_json(config);
    this.factor = if type_of(parsed) == "map" && "factor" in parsed { parsed.factor } else { 1.0 };
}

fn FILTER_NAME(readings) {
    let factor = if "factor" in this { this.factor } else { 1.0 };
    for i in 0..readings.len() {
        for asset in readings[i].keys() {
            let values = readings[i][asset].readings;
            for name in values.keys() {
                let v = values[name];
                if type_of(v) == "f64" || type_of(v) == "i64" {
                    values[name] = v * factor;
                }
            }
            readings[i][asset].readings = values;
        }
    }
    readings
}
"#;

    /// Drops readings whose `threshold_datapoint` is below `threshold`
    pub const THRESHOLD: &str = r#"
fn set_filter_config(config) {
    let parsed = parse_json(config);
    if type_of(parsed) == "map" {
        this.datapoint = parsed.threshold_datapoint ?? "value";
        this.threshold = parsed.threshold ?? 0.0;
    }
}

fn FILTER_NAME(readings) {
    let name = if "datapoint" in this { this.datapoint } else { "value" };
    let limit = if "threshold" in this { this.threshold } else { 0.0 };
    readings.filter(|r| {
        let keep = true;
        for asset in r.keys() {
            let v = r[asset].readings[name];
            if v != () && v < limit {
                keep = false;
            }
        }
        keep
    })
}
"#;

    /// All templates with their names
    pub fn all() -> Vec<(&'static str, &'static str)> {
        vec![
            ("passthrough", PASSTHROUGH),
            ("scale", SCALE),
            ("threshold", THRESHOLD),
        ]
    }

    /// Look up a template by name
    pub fn get(template: &str) -> Option<&'static str> {
        all()
            .into_iter()
            .find(|(name, _)| *name == template)
            .map(|(_, source)| source)
    }

    /// Instantiate a template for a script called `script_name`
    pub fn render(template: &str, script_name: &str) -> String {
        template.replace(PLACEHOLDER, script_name)
    }
}
