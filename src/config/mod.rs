//! Configuration for the script filter
//!
//! The host hands each filter instance a configuration category: a named
//! JSON object whose items are either bare values or item objects carrying
//! `value` and/or `default` fields. Values are frequently strings even when
//! they describe booleans (`"true"`), as category storage is text based.
//!
//! # Items
//!
//! - `plugin` - fixed identity, always `"rhai"`
//! - `enable` - whether the script runs at all (default `false`)
//! - `script` - bare script name, resolved to `<scripts dir>/<name>.rhai`
//!   (default empty, meaning no script)
//! - `config` - JSON handed verbatim to the script's `set_filter_config`
//!   (default `{}`)
//!
//! # App Data Location
//!
//! The CLI keeps its scripts under the platform data directory by default:
//! - **Linux**: `~/.local/share/script-filter/scripts/`
//! - **macOS**: `~/Library/Application Support/script-filter/scripts/`
//! - **Windows**: `%APPDATA%\script-filter\scripts\`

pub mod settings;

pub use settings::*;

use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Filter identity reported to the host and in log records
pub const FILTER_NAME: &str = "rhai";

/// Application identifier for data directories
pub const APP_ID: &str = "script-filter";

/// Script file extension, without the dot
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Script function receiving the configuration JSON
pub const CONFIG_ENTRY_POINT: &str = "set_filter_config";

/// Interface version of the filter plugin contract
pub const INTERFACE_VERSION: &str = "1.0.0";

pub const PLUGIN_ITEM: &str = "plugin";
pub const ENABLE_ITEM: &str = "enable";
pub const SCRIPT_ITEM: &str = "script";
pub const CONFIG_ITEM: &str = "config";

/// Script configuration used when none is given
pub const DEFAULT_SCRIPT_CONFIG: &str = "{}";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Default location of filter scripts
pub fn default_scripts_dir() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join("scripts"))
}

// ==================== Configuration Category ====================

/// A named set of configuration items
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCategory {
    name: String,
    items: serde_json::Map<String, Value>,
}

impl ConfigCategory {
    /// Create a category from a JSON object of items
    pub fn new(name: impl Into<String>, items: Value) -> Result<Self> {
        match items {
            Value::Object(items) => Ok(Self {
                name: name.into(),
                items,
            }),
            other => Err(FilterError::Configuration(format!(
                "configuration category must be a JSON object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Parse a category from JSON text
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        Self::new(name, serde_json::from_str(text)?)
    }

    /// Category (instance) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw item, as stored
    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    /// The effective value of an item: its `value`, else its `default`, else
    /// the item itself when it is a bare value.
    pub fn item_value(&self, key: &str) -> Option<&Value> {
        self.items.get(key).and_then(effective_value)
    }

    /// Replace an item's value, keeping any metadata on item objects
    pub fn set_value(&mut self, key: &str, value: Value) {
        match self.items.get_mut(key) {
            Some(Value::Object(item)) => {
                item.insert("value".to_string(), value);
            }
            _ => {
                self.items.insert(key.to_string(), value);
            }
        }
    }

    /// Builder-style [`ConfigCategory::set_value`]
    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.set_value(key, value);
        self
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.items.clone())
    }
}

fn effective_value(item: &Value) -> Option<&Value> {
    match item {
        Value::Object(fields) if fields.contains_key("value") || fields.contains_key("default") => {
            fields.get("value").or_else(|| fields.get("default"))
        }
        other => Some(other),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ==================== Filter Configuration ====================

/// The filter's effective configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Whether the script runs
    pub enabled: bool,
    /// Bare script name; empty means none configured
    pub script_name: String,
    /// JSON text handed to the script
    pub script_config: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            script_name: String::new(),
            script_config: DEFAULT_SCRIPT_CONFIG.to_string(),
        }
    }
}

impl FilterConfig {
    /// Read the configuration from a category. Missing items take their
    /// defaults; present but malformed items are an error.
    pub fn from_category(category: &ConfigCategory) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = category.item_value(ENABLE_ITEM) {
            config.enabled = parse_enable(value)?;
        }
        if let Some(value) = category.item_value(SCRIPT_ITEM) {
            config.script_name = parse_script_name(value)?;
        }
        if let Some(value) = category.item_value(CONFIG_ITEM) {
            config.script_config = parse_script_config(value)?;
        }
        Ok(config)
    }

    /// Parse reconfiguration text. The `enable`, `script` and `config` items
    /// must all be present.
    pub fn parse_strict(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FilterError::Configuration(format!("invalid JSON: {e}")))?;
        let category = ConfigCategory::new("reconfiguration", value)?;

        let require = |key: &str| {
            category.item_value(key).ok_or_else(|| {
                FilterError::Configuration(format!("missing '{key}' item"))
            })
        };

        Ok(Self {
            enabled: parse_enable(require(ENABLE_ITEM)?)?,
            script_name: parse_script_name(require(SCRIPT_ITEM)?)?,
            script_config: parse_script_config(require(CONFIG_ITEM)?)?,
        })
    }

    /// Enabled with a script configured
    pub fn is_active(&self) -> bool {
        self.enabled && !self.script_name.is_empty()
    }
}

fn parse_enable(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(FilterError::Configuration(format!(
            "'{ENABLE_ITEM}' must be a boolean, found {other}"
        ))),
    }
}

fn parse_script_name(value: &Value) -> Result<String> {
    let Value::String(name) = value else {
        return Err(FilterError::Configuration(format!(
            "'{SCRIPT_ITEM}' must be a string, found {}",
            json_type_name(value)
        )));
    };
    let name = name.trim();
    let suffix = format!(".{SCRIPT_EXTENSION}");
    Ok(name.strip_suffix(suffix.as_str()).unwrap_or(name).to_string())
}

/// `config` may hold JSON text or an inline JSON value; both normalise to
/// text. Text must itself be valid JSON.
fn parse_script_config(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => {
            serde_json::from_str::<Value>(text).map_err(|e| {
                FilterError::Configuration(format!("'{CONFIG_ITEM}' is not valid JSON: {e}"))
            })?;
            Ok(text.clone())
        }
        other => Ok(serde_json::to_string(other)?),
    }
}

// ==================== Plugin Information ====================

/// What the filter reports about itself to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub plugin_type: String,
    pub interface_version: String,
    pub default_config: Value,
}

fn default_items() -> serde_json::Map<String, Value> {
    let mut items = serde_json::Map::new();
    items.insert(
        PLUGIN_ITEM.to_string(),
        json!({
            "description": "Rhai script filter plugin",
            "type": "string",
            "readonly": "true",
            "default": FILTER_NAME
        }),
    );
    items.insert(
        ENABLE_ITEM.to_string(),
        json!({
            "description": "A switch that can be used to enable or disable execution of the Rhai filter.",
            "type": "boolean",
            "displayName": "Enabled",
            "default": "false"
        }),
    );
    items.insert(
        CONFIG_ITEM.to_string(),
        json!({
            "description": "Rhai filter configuration.",
            "type": "JSON",
            "displayName": "Configuration",
            "order": "2",
            "default": DEFAULT_SCRIPT_CONFIG
        }),
    );
    items.insert(
        SCRIPT_ITEM.to_string(),
        json!({
            "description": "Rhai script to load.",
            "type": "script",
            "displayName": "Rhai Script",
            "order": "1",
            "default": ""
        }),
    );
    items
}

/// The default configuration category items
pub fn default_category_items() -> Value {
    Value::Object(default_items())
}

/// A category holding only default items
pub fn default_category(name: impl Into<String>) -> ConfigCategory {
    ConfigCategory {
        name: name.into(),
        items: default_items(),
    }
}

pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        name: FILTER_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        plugin_type: "filter".to_string(),
        interface_version: INTERFACE_VERSION.to_string(),
        default_config: default_category_items(),
    }
}
