//! The filter stage and its seams to the host pipeline.
//!
//! ```text
//! upstream ──► [ScriptFilter] ──► OutputSink (next stage)
//!                    │
//!                    └──► AssetTracker
//! ```
//!
//! # Design
//!
//! - **Two locks**: a per-instance configuration mutex guards phase, config
//!   and binding; the process-wide execution lock guards the interpreter.
//!   The configuration mutex is always taken first, and ingest never holds
//!   both at once.
//! - **Forward after release**: the execution lock is dropped before the
//!   batch is forwarded, so a downstream stage in the same process may run
//!   its own script.
//! - **Passthrough on failure**: nothing a script does can lose a batch.

pub mod filter;
pub mod host;
pub mod reconfigure;

pub use filter::{FilterPhase, FilterStats, ScriptFilter};
pub use host::{
    AssetTracker, InMemoryAssetTracker, NoopAssetTracker, OutputSink, TrackingTuple, FILTER_EVENT,
};
pub use reconfigure::{Reconfiguration, ReconfigurationController};
