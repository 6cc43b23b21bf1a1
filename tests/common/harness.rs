//! A filter wired to a channel sink and an in-memory tracker

use super::{fixtures_dir, test_timeout};
use crossbeam_channel::{unbounded, Receiver};
use script_filter::pipeline::InMemoryAssetTracker;
use script_filter::{ConfigCategory, ReadingSet, Result, ScriptFilter};
use std::path::Path;
use std::sync::Arc;

pub struct FilterHarness {
    pub filter: ScriptFilter,
    pub output: Receiver<ReadingSet>,
    pub tracker: Arc<InMemoryAssetTracker>,
}

impl FilterHarness {
    /// Start a filter over the fixture scripts
    pub fn start(category: ConfigCategory) -> Result<Self> {
        Self::start_in(category, &fixtures_dir())
    }

    pub fn start_in(category: ConfigCategory, scripts_dir: &Path) -> Result<Self> {
        let (tx, rx) = unbounded();
        let tracker = Arc::new(InMemoryAssetTracker::new());
        let filter = ScriptFilter::init(&category, scripts_dir, tx, tracker.clone())?;
        Ok(Self {
            filter,
            output: rx,
            tracker,
        })
    }

    /// Ingest one batch and return the single batch forwarded for it
    pub fn run(&self, batch: ReadingSet) -> ReadingSet {
        self.filter.ingest(batch);
        let forwarded = self
            .output
            .recv_timeout(test_timeout())
            .expect("filter forwarded nothing");
        assert!(
            self.output.try_recv().is_err(),
            "filter forwarded more than one batch"
        );
        forwarded
    }

    pub fn shutdown(self) {
        self.filter.shutdown();
    }
}
