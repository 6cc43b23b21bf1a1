//! Applying new configuration to a filter.
//!
//! A reconfiguration either fully succeeds or leaves the previous script,
//! configuration and enabled state exactly as they were. The caller commits
//! the returned [`Reconfiguration`] only on success.

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::pipeline::filter::FilterPhase;
use crate::scripting::{ExecutionLock, ScriptBinding};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The state a successful reconfiguration moves the filter to.
#[derive(Debug)]
pub struct Reconfiguration {
    pub config: FilterConfig,
    /// `None` when no script is configured
    pub binding: Option<Arc<ScriptBinding>>,
    /// Whether the binding differs from the previous one
    pub rebound: bool,
}

impl Reconfiguration {
    pub fn phase(&self) -> FilterPhase {
        if self.config.enabled && self.binding.is_some() {
            FilterPhase::Enabled
        } else {
            FilterPhase::Disabled
        }
    }
}

/// Validates configuration and (re)binds scripts for one filter instance.
#[derive(Debug, Clone)]
pub struct ReconfigurationController {
    scripts_dir: PathBuf,
}

impl ReconfigurationController {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Parse `text` strictly and apply it on top of `current`.
    pub fn apply(
        &self,
        current: Option<&Arc<ScriptBinding>>,
        text: &str,
    ) -> Result<Reconfiguration> {
        let config = FilterConfig::parse_strict(text)?;
        self.apply_config(current, config)
    }

    /// Apply an already parsed configuration.
    ///
    /// Takes the execution lock when a script is configured, so it must not
    /// be called while holding it.
    pub fn apply_config(
        &self,
        current: Option<&Arc<ScriptBinding>>,
        config: FilterConfig,
    ) -> Result<Reconfiguration> {
        let Some(location) = ScriptBinding::resolve(&self.scripts_dir, &config.script_name)
        else {
            info!("No script configured, filter disabled");
            return Ok(Reconfiguration {
                config,
                rebound: current.is_some(),
                binding: None,
            });
        };

        let guard = ExecutionLock::acquire();
        let interpreter = guard.interpreter()?;

        let (binding, rebound) = match current {
            Some(binding) if binding.location() == &location => {
                debug!(script = binding.name(), "Keeping current script binding");
                (binding.clone(), false)
            }
            _ => (Arc::new(ScriptBinding::bind(interpreter, location)?), true),
        };

        binding
            .apply_config(interpreter, &config.script_config)
            .map_err(|e| match e {
                FilterError::Invocation { message, .. } => FilterError::Configuration(format!(
                    "script '{}' rejected its configuration: {message}",
                    binding.name()
                )),
                other => other,
            })?;

        info!(
            script = binding.name(),
            enabled = config.enabled,
            rebound,
            "Filter configuration applied"
        );

        Ok(Reconfiguration {
            config,
            binding: Some(binding),
            rebound,
        })
    }
}
