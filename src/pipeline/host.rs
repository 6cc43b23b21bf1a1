//! Seams to the host pipeline.
//!
//! - **`OutputSink`**: where the filter forwards exactly one batch per
//!   ingest. Implemented for closures and crossbeam channel senders.
//! - **`AssetTracker`**: fire-and-forget record of which assets a stage
//!   has processed.

use crate::types::ReadingSet;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::warn;

/// Event name recorded for assets processed by a filter stage.
pub const FILTER_EVENT: &str = "Filter";

/// Downstream stage of the pipeline.
pub trait OutputSink: Send + Sync {
    /// Hand a batch onwards. Ownership passes to the sink.
    fn forward(&self, readings: ReadingSet);
}

impl<F> OutputSink for F
where
    F: Fn(ReadingSet) + Send + Sync,
{
    fn forward(&self, readings: ReadingSet) {
        self(readings)
    }
}

impl OutputSink for Sender<ReadingSet> {
    fn forward(&self, readings: ReadingSet) {
        if self.send(readings).is_err() {
            warn!("Downstream receiver dropped, batch discarded");
        }
    }
}

/// Asset usage telemetry.
pub trait AssetTracker: Send + Sync {
    /// Record that `service` handled `asset` for `event`.
    fn add_asset_tracking_tuple(&self, service: &str, asset: &str, event: &str);
}

/// Tracker that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAssetTracker;

impl AssetTracker for NoopAssetTracker {
    fn add_asset_tracking_tuple(&self, _service: &str, _asset: &str, _event: &str) {}
}

/// A recorded tracking call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackingTuple {
    pub service: String,
    pub asset: String,
    pub event: String,
}

/// Tracker that keeps every call in memory.
#[derive(Debug, Default)]
pub struct InMemoryAssetTracker {
    calls: Mutex<Vec<TrackingTuple>>,
}

impl InMemoryAssetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call, in order.
    pub fn calls(&self) -> Vec<TrackingTuple> {
        self.calls.lock().clone()
    }

    /// Distinct tuples.
    pub fn tuples(&self) -> BTreeSet<TrackingTuple> {
        self.calls.lock().iter().cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl AssetTracker for InMemoryAssetTracker {
    fn add_asset_tracking_tuple(&self, service: &str, asset: &str, event: &str) {
        self.calls.lock().push(TrackingTuple {
            service: service.to_string(),
            asset: asset.to_string(),
            event: event.to_string(),
        });
    }
}
