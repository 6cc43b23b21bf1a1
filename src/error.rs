//! Error handling for the script filter
//!
//! This module defines the filter's error type and a Result alias for use
//! throughout the crate. The variants follow the failure taxonomy of the
//! filter: configuration, binding, marshaling, invocation and lifecycle
//! errors are all absorbed at the interpreter boundary and turned into a
//! passthrough plus a log record; none of them is fatal to the pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for script filter operations
#[derive(Error, Debug)]
pub enum FilterError {
    /// Missing or malformed configuration items, or unparsable JSON
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Script could not be loaded or lacks a required entry point
    #[error("Binding error for script '{script}': {message}")]
    Binding { script: String, message: String },

    /// Readings could not be converted to or from the script's data shape
    #[error("Marshal error: {0}")]
    Marshal(String),

    /// The script raised or the call itself failed
    #[error("Invocation error in '{function}': {message}")]
    Invocation { function: String, message: String },

    /// The embedded interpreter could not be started or is no longer live
    #[error("Interpreter lifecycle error: {0}")]
    Lifecycle(String),

    /// Scripts directory problems
    #[error("Scripts directory {path:?} is not usable: {message}")]
    ScriptsDir { path: PathBuf, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML errors from the host configuration file
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FilterError>,
    },
}

impl FilterError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FilterError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an invocation error from a Rhai error raised by `function`
    pub fn from_rhai_error(function: &str, err: Box<rhai::EvalAltResult>) -> Self {
        FilterError::Invocation {
            function: function.to_string(),
            message: err.to_string(),
        }
    }

    /// Short machine-friendly name of the failure class, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FilterError::Configuration(_) => "configuration",
            FilterError::Binding { .. } => "binding",
            FilterError::Marshal(_) => "marshal",
            FilterError::Invocation { .. } => "invocation",
            FilterError::Lifecycle(_) | FilterError::ScriptsDir { .. } => "lifecycle",
            FilterError::Io(_) => "io",
            FilterError::Json(_) | FilterError::Toml(_) => "configuration",
            FilterError::WithContext { source, .. } => source.kind(),
        }
    }
}

/// Result type alias for script filter operations
pub type Result<T> = std::result::Result<T, FilterError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FilterError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FilterError::Io(e).with_context(f()))
    }
}
