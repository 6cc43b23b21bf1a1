//! The script filter stage.
//!
//! ```text
//! ingest ──► enabled? ──no──────────────────────────────────────────► sink
//!               │yes
//!               ▼
//!        [ExecutionLock] to_native ──► invoke ──► from_native
//!               │ any failure: original batch       │ success: new batch
//!               ▼                                    ▼
//!        release lock ─────────────────────────────────────────────► sink
//! ```
//!
//! Exactly one batch reaches the sink per ingest: either the original,
//! moved through untouched, or the script's replacement.

use crate::config::{ConfigCategory, FilterConfig, FILTER_NAME};
use crate::error::{FilterError, Result};
use crate::marshal;
use crate::pipeline::host::{AssetTracker, OutputSink, FILTER_EVENT};
use crate::pipeline::reconfigure::{Reconfiguration, ReconfigurationController};
use crate::scripting::{ExecutionLock, InterpreterHandle, ScriptBinding};
use crate::types::ReadingSet;
use parking_lot::Mutex;
use rhai::Dynamic;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Action reported when a batch falls back to passthrough
const FALLBACK_ACTION: &str = "pass unfiltered data onwards";

/// Lifecycle phase of a filter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterPhase {
    Uninitialized,
    /// Batches pass through without touching the interpreter
    Disabled,
    /// Batches are handed to the script
    Enabled,
    /// A reconfiguration is being applied
    Reconfiguring,
    Shutdown,
}

/// Counters describing what the filter has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub batches_ingested: u64,
    pub passed_through_disabled: u64,
    pub transformed: u64,
    pub marshal_failures: u64,
    pub invocation_failures: u64,
    pub result_failures: u64,
    pub reconfigurations_applied: u64,
    pub reconfigurations_rejected: u64,
}

impl FilterStats {
    /// Batches forwarded unchanged because something failed
    pub fn fallbacks(&self) -> u64 {
        self.marshal_failures + self.invocation_failures + self.result_failures
    }
}

#[derive(Debug, Default)]
struct Counters {
    batches_ingested: AtomicU64,
    passed_through_disabled: AtomicU64,
    transformed: AtomicU64,
    marshal_failures: AtomicU64,
    invocation_failures: AtomicU64,
    result_failures: AtomicU64,
    reconfigurations_applied: AtomicU64,
    reconfigurations_rejected: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FilterStats {
        FilterStats {
            batches_ingested: self.batches_ingested.load(Ordering::Relaxed),
            passed_through_disabled: self.passed_through_disabled.load(Ordering::Relaxed),
            transformed: self.transformed.load(Ordering::Relaxed),
            marshal_failures: self.marshal_failures.load(Ordering::Relaxed),
            invocation_failures: self.invocation_failures.load(Ordering::Relaxed),
            result_failures: self.result_failures.load(Ordering::Relaxed),
            reconfigurations_applied: self.reconfigurations_applied.load(Ordering::Relaxed),
            reconfigurations_rejected: self.reconfigurations_rejected.load(Ordering::Relaxed),
        }
    }
}

/// State guarded by the configuration mutex
struct FilterState {
    phase: FilterPhase,
    config: FilterConfig,
    binding: Option<Arc<ScriptBinding>>,
    handle: Option<InterpreterHandle>,
}

enum Outcome {
    Transformed(ReadingSet),
    PassedThrough(ReadingSet),
}

/// A filter stage delegating each batch to a Rhai script.
pub struct ScriptFilter {
    name: String,
    controller: ReconfigurationController,
    state: Mutex<FilterState>,
    sink: Box<dyn OutputSink>,
    tracker: Arc<dyn AssetTracker>,
    counters: Counters,
}

impl ScriptFilter {
    /// Create a filter instance from its configuration category.
    ///
    /// Fails only when a script is configured and it cannot be bound or
    /// rejects its initial configuration. Everything else leaves the filter
    /// running, possibly disabled.
    pub fn init<S>(
        category: &ConfigCategory,
        scripts_dir: impl Into<PathBuf>,
        sink: S,
        tracker: Arc<dyn AssetTracker>,
    ) -> Result<Self>
    where
        S: OutputSink + 'static,
    {
        let scripts_dir = scripts_dir.into();
        let name = category.name().to_string();

        let mut filter = Self {
            name,
            controller: ReconfigurationController::new(scripts_dir.clone()),
            state: Mutex::new(FilterState {
                phase: FilterPhase::Uninitialized,
                config: FilterConfig::default(),
                binding: None,
                handle: None,
            }),
            sink: Box::new(sink),
            tracker,
            counters: Counters::default(),
        };

        let state = filter.state.get_mut();

        let config = match FilterConfig::from_category(category) {
            Ok(config) => config,
            Err(e) => {
                warn!(filter = FILTER_NAME, instance = %filter.name, error = %e, "Invalid configuration, filter disabled");
                state.phase = FilterPhase::Disabled;
                return Ok(filter);
            }
        };

        state.handle = match InterpreterHandle::acquire(&scripts_dir) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(filter = FILTER_NAME, instance = %filter.name, error = %e, "Interpreter unavailable, filter disabled");
                state.config = config;
                state.phase = FilterPhase::Disabled;
                return Ok(filter);
            }
        };

        if config.script_name.is_empty() {
            warn!(filter = FILTER_NAME, instance = %filter.name, "No script configured, filter disabled");
            state.config = config;
            state.phase = FilterPhase::Disabled;
            return Ok(filter);
        }

        let applied = filter
            .controller
            .apply_config(None, config)
            .map_err(|e| e.with_context(format!("Filter '{}' failed to start", filter.name)))?;

        state.phase = applied.phase();
        state.config = applied.config;
        state.binding = applied.binding;
        info!(
            filter = FILTER_NAME,
            instance = %filter.name,
            phase = ?state.phase,
            "Filter initialised"
        );
        Ok(filter)
    }

    /// Category (instance) name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scripts_dir(&self) -> &Path {
        self.controller.scripts_dir()
    }

    pub fn phase(&self) -> FilterPhase {
        self.state.lock().phase
    }

    pub fn config(&self) -> FilterConfig {
        self.state.lock().config.clone()
    }

    /// Name of the bound script, if any
    pub fn script_name(&self) -> Option<String> {
        self.state
            .lock()
            .binding
            .as_ref()
            .map(|b| b.name().to_string())
    }

    pub fn stats(&self) -> FilterStats {
        self.counters.snapshot()
    }

    /// Process one batch. The result is observable only through the sink.
    ///
    /// Must not be called while the current thread holds the execution lock.
    pub fn ingest(&self, readings: ReadingSet) {
        Counters::bump(&self.counters.batches_ingested);

        let binding = {
            let state = self.state.lock();
            match (state.phase, &state.binding) {
                (FilterPhase::Enabled, Some(binding)) => Some(binding.clone()),
                _ => None,
            }
        };

        let Some(binding) = binding else {
            Counters::bump(&self.counters.passed_through_disabled);
            trace!(instance = %self.name, count = readings.len(), "Filter disabled, passing batch through");
            self.sink.forward(readings);
            return;
        };

        self.track(&readings);
        let forwarded = match self.transform(&binding, readings) {
            Outcome::Transformed(replacement) => {
                self.track(&replacement);
                replacement
            }
            Outcome::PassedThrough(original) => original,
        };

        self.sink.forward(forwarded);
    }

    /// Run the script over a batch with the execution lock held. The lock is
    /// released before this returns.
    fn transform(&self, binding: &ScriptBinding, readings: ReadingSet) -> Outcome {
        let guard = ExecutionLock::acquire();

        let interpreter = match guard.interpreter() {
            Ok(interpreter) => interpreter,
            Err(e) => {
                self.report_failure(binding, "interpreter unavailable", &e);
                return Outcome::PassedThrough(readings);
            }
        };

        let native = match marshal::to_native(&readings) {
            Ok(native) => native,
            Err(e) => {
                Counters::bump(&self.counters.marshal_failures);
                self.report_failure(binding, "create filter data error", &e);
                return Outcome::PassedThrough(readings);
            }
        };

        let result = match binding.invoke(interpreter, Dynamic::from_array(native)) {
            Ok(result) => result,
            Err(e) => {
                Counters::bump(&self.counters.invocation_failures);
                self.report_failure(binding, "filter error", &e);
                return Outcome::PassedThrough(readings);
            }
        };

        match marshal::from_native(result) {
            Ok(replacement) => {
                Counters::bump(&self.counters.transformed);
                debug!(
                    instance = %self.name,
                    input = readings.len(),
                    output = replacement.len(),
                    "Batch transformed"
                );
                drop(readings);
                Outcome::Transformed(replacement)
            }
            Err(e) => {
                Counters::bump(&self.counters.result_failures);
                self.report_failure(binding, "filter result error", &e);
                Outcome::PassedThrough(readings)
            }
        }
    }

    fn track(&self, readings: &ReadingSet) {
        for reading in readings.iter() {
            self.tracker
                .add_asset_tracking_tuple(&self.name, reading.asset_name(), FILTER_EVENT);
        }
    }

    fn report_failure(&self, binding: &ScriptBinding, stage: &str, err: &FilterError) {
        error!(
            filter = FILTER_NAME,
            instance = %self.name,
            script = binding.name(),
            kind = err.kind(),
            action = FALLBACK_ACTION,
            "Filter '{}' ({}), script '{}', {}: {}",
            FILTER_NAME,
            self.name,
            binding.name(),
            stage,
            err
        );
    }

    /// Apply new configuration text.
    ///
    /// The text must hold the `enable`, `script` and `config` items. On any
    /// failure the previous state is kept and the error is logged and
    /// returned. Concurrent ingest calls see either the old or the new state.
    pub fn reconfigure(&self, text: &str) -> Result<FilterPhase> {
        let mut state = self.state.lock();
        let previous = state.phase;
        state.phase = FilterPhase::Reconfiguring;

        let result = self.reconfigure_locked(&mut state, text);

        match result {
            Ok(applied) => {
                let phase = applied.phase();
                let replaced = std::mem::replace(&mut state.binding, applied.binding);
                state.config = applied.config;
                state.phase = phase;
                Counters::bump(&self.counters.reconfigurations_applied);
                info!(instance = %self.name, phase = ?phase, rebound = applied.rebound, "Filter reconfigured");
                drop(state);
                drop(replaced);
                Ok(phase)
            }
            Err(e) => {
                state.phase = previous;
                Counters::bump(&self.counters.reconfigurations_rejected);
                error!(
                    filter = FILTER_NAME,
                    instance = %self.name,
                    kind = e.kind(),
                    error = %e,
                    "Reconfiguration rejected, keeping previous configuration"
                );
                Err(e)
            }
        }
    }

    fn reconfigure_locked(
        &self,
        state: &mut FilterState,
        text: &str,
    ) -> Result<Reconfiguration> {
        let config = FilterConfig::parse_strict(text)?;

        if state.handle.is_none() && !config.script_name.is_empty() {
            state.handle = Some(InterpreterHandle::acquire(self.scripts_dir())?);
        }

        self.controller.apply_config(state.binding.as_ref(), config)
    }

    /// Stop the filter, releasing its script and its claim on the
    /// interpreter. The last filter to shut down finalizes the interpreter.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let state = self.state.get_mut();
        if state.phase == FilterPhase::Shutdown {
            return;
        }
        state.phase = FilterPhase::Shutdown;

        if let Some(binding) = state.binding.take() {
            if ExecutionLock::held_by_current_thread() {
                drop(binding);
            } else {
                let _guard = ExecutionLock::acquire();
                drop(binding);
            }
        }
        if let Some(handle) = state.handle.take() {
            handle.release();
        }
        info!(filter = FILTER_NAME, instance = %self.name, "Filter shut down");
    }
}

impl Drop for ScriptFilter {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ScriptFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFilter")
            .field("name", &self.name)
            .field("scripts_dir", &self.controller.scripts_dir())
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}
