//! # script-filter: Rhai scripting for data pipelines
//!
//! A filter stage that hands each batch of readings to a user-supplied Rhai
//! script running in an interpreter embedded in the host process. Whatever
//! the script does, the pipeline keeps flowing: on any failure the original
//! batch is forwarded unchanged.
//!
//! ## Architecture
//!
//! - **Scripting**: one process-wide Rhai interpreter, reference counted
//!   across filter instances and guarded by a global execution lock
//! - **Marshal**: readings to and from the script's array-of-maps shape
//! - **Pipeline**: the `ScriptFilter` stage, reconfiguration, and the host
//!   seams (`OutputSink`, `AssetTracker`)
//! - **Config**: the filter's configuration category and host settings
//!
//! ## Example
//!
//! ```ignore
//! use script_filter::{config::default_category, pipeline::NoopAssetTracker, ScriptFilter};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let category = default_category("scaler")
//!     .with_value("enable", json!(true))
//!     .with_value("script", json!("scale"))
//!     .with_value("config", json!({"factor": 2}));
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let filter = ScriptFilter::init(&category, "/srv/filters", tx, Arc::new(NoopAssetTracker))?;
//!
//! filter.ingest(readings);
//! let forwarded = rx.recv()?;
//!
//! filter.shutdown();
//! ```

pub mod config;
pub mod error;
pub mod marshal;
pub mod pipeline;
pub mod scripting;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigCategory, FilterConfig, HostSettings};
pub use error::{FilterError, Result};
pub use pipeline::{AssetTracker, FilterPhase, FilterStats, OutputSink, ScriptFilter};
pub use types::{DatapointValue, Reading, ReadingSet};
