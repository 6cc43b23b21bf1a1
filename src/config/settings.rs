//! Host settings for the `script-filter` command line tool
//!
//! The CLI stands in for a pipeline host. Its settings are read from a TOML
//! file and describe where scripts live, how to log, and the filter
//! instance's configuration category:
//!
//! ```toml
//! scripts_dir = "/srv/filters"
//! log_level = "debug"
//!
//! [filter]
//! name = "scaler"
//! enable = true
//! script = "scale"
//!
//! [filter.config]
//! factor = 2.0
//! ```

use super::{
    default_category, default_scripts_dir, ConfigCategory, CONFIG_ITEM, ENABLE_ITEM, SCRIPT_ITEM,
};
use crate::error::{FilterError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Settings for one host process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Directory holding `<name>.rhai` scripts
    pub scripts_dir: Option<PathBuf>,
    /// Default tracing filter directive
    pub log_level: String,
    /// The filter instance
    pub filter: FilterSettings,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            scripts_dir: None,
            log_level: "info".to_string(),
            filter: FilterSettings::default(),
        }
    }
}

/// One filter instance's category, in TOML form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Category (instance) name
    pub name: String,
    pub enable: bool,
    pub script: String,
    /// Passed to the script as JSON text
    pub config: Value,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            name: "script-filter".to_string(),
            enable: false,
            script: String::new(),
            config: Value::Object(serde_json::Map::new()),
        }
    }
}

impl FilterSettings {
    /// Build the configuration category the filter is initialised with
    pub fn to_category(&self) -> ConfigCategory {
        default_category(self.name.clone())
            .with_value(ENABLE_ITEM, Value::String(self.enable.to_string()))
            .with_value(SCRIPT_ITEM, Value::String(self.script.clone()))
            .with_value(CONFIG_ITEM, self.config.clone())
    }
}

impl HostSettings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path` when given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// The configured scripts directory, falling back to the platform
    /// default
    pub fn resolved_scripts_dir(&self) -> Result<PathBuf> {
        self.scripts_dir
            .clone()
            .or_else(default_scripts_dir)
            .ok_or_else(|| {
                FilterError::Configuration(
                    "no scripts directory configured and no platform data directory".to_string(),
                )
            })
    }
}
