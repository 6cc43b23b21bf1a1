//! Embedded interpreter lifecycle
//!
//! The interpreter is shared by every filter instance in the process. It is
//! started when the first [`InterpreterHandle`] is acquired and finalized when
//! the last one is released. The count of live handles is kept next to the
//! interpreter, behind the [`ExecutionLock`], so acquire and release are
//! serialized against each other and against every script call.

use crate::error::{FilterError, Result};
use crate::marshal::json_to_dynamic;
use crate::scripting::lock::ExecutionLock;
use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection};
use rhai::{Dynamic, Engine, EvalAltResult, Position};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// The live embedded interpreter
pub struct Interpreter {
    engine: Engine,
    search_paths: Vec<PathBuf>,
}

impl Interpreter {
    fn start() -> Self {
        let mut engine = Engine::new();
        configure_engine(&mut engine);
        Self {
            engine,
            search_paths: Vec::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Directories `import` statements are resolved against, in order
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn add_search_path(&mut self, dir: &Path) {
        if self.search_paths.iter().any(|p| p == dir) {
            return;
        }
        self.search_paths.push(dir.to_path_buf());

        let mut resolvers = ModuleResolversCollection::new();
        for path in &self.search_paths {
            resolvers.push(FileModuleResolver::new_with_path(path));
        }
        self.engine.set_module_resolver(resolvers);
        debug!(path = ?dir, "Added script search path");
    }
}

/// Lifecycle state guarded by the execution lock
pub(crate) struct Runtime {
    interpreter: Option<Interpreter>,
    instances: usize,
}

impl Runtime {
    pub(crate) const fn new() -> Self {
        Self {
            interpreter: None,
            instances: 0,
        }
    }

    pub(crate) fn interpreter(&self) -> Option<&Interpreter> {
        self.interpreter.as_ref()
    }

    fn attach(&mut self, scripts_dir: &Path) -> usize {
        let interpreter = self.interpreter.get_or_insert_with(|| {
            info!("Starting embedded Rhai interpreter");
            Interpreter::start()
        });
        interpreter.add_search_path(scripts_dir);
        self.instances += 1;
        self.instances
    }

    fn detach(&mut self) -> usize {
        self.instances = self.instances.saturating_sub(1);
        if self.instances == 0 && self.interpreter.take().is_some() {
            info!("Finalized embedded Rhai interpreter");
        }
        self.instances
    }
}

/// One filter instance's claim on the shared interpreter
///
/// Released explicitly with [`InterpreterHandle::release`] or on drop,
/// exactly once either way.
#[derive(Debug)]
pub struct InterpreterHandle {
    scripts_dir: PathBuf,
    released: bool,
}

impl InterpreterHandle {
    /// Attach to the interpreter, starting it if no other instance is live,
    /// and make `scripts_dir` importable.
    ///
    /// Must not be called while the current thread holds the execution lock.
    pub fn acquire(scripts_dir: impl AsRef<Path>) -> Result<Self> {
        let scripts_dir = scripts_dir.as_ref();
        if !scripts_dir.is_dir() {
            return Err(FilterError::ScriptsDir {
                path: scripts_dir.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }
        if ExecutionLock::held_by_current_thread() {
            return Err(FilterError::Lifecycle(
                "cannot attach to the interpreter while holding the execution lock".to_string(),
            ));
        }

        let mut guard = ExecutionLock::acquire();
        let instances = guard.runtime_mut().attach(scripts_dir);
        debug!(instances, path = ?scripts_dir, "Interpreter handle acquired");

        Ok(Self {
            scripts_dir: scripts_dir.to_path_buf(),
            released: false,
        })
    }

    pub fn scripts_dir(&self) -> &Path {
        &self.scripts_dir
    }

    /// Give up this instance's claim. The last release finalizes the
    /// interpreter.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if ExecutionLock::held_by_current_thread() {
            // Releasing here would self-deadlock; leak the claim instead.
            error!("Interpreter handle released while holding the execution lock");
            return;
        }

        let mut guard = ExecutionLock::acquire();
        let remaining = guard.runtime_mut().detach();
        debug!(remaining, "Interpreter handle released");
    }
}

impl Drop for InterpreterHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Whether the shared interpreter is currently live.
///
/// Takes the execution lock, so it must not be called while holding it.
pub fn is_running() -> bool {
    ExecutionLock::acquire().interpreter().is_ok()
}

/// Number of handles currently attached to the interpreter.
pub fn live_instances() -> usize {
    let mut guard = ExecutionLock::acquire();
    guard.runtime_mut().instances
}

/// Safety limits, logging hooks and helper functions for filter scripts
fn configure_engine(engine: &mut Engine) {
    // No operation limit: a script call is allowed to run to completion.
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_string_size(1_000_000);

    engine.on_print(|text| info!(target: "script", "{text}"));
    engine.on_debug(|text, source, pos: Position| {
        debug!(target: "script", source = source.unwrap_or("<unknown>"), position = %pos, "{text}");
    });

    engine.register_fn(
        "parse_json",
        |text: &str| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
            serde_json::from_str::<serde_json::Value>(text)
                .map(json_to_dynamic)
                .map_err(|e| format!("invalid JSON: {e}").into())
        },
    );

    // Deadband: ignore small changes around a center value
    engine.register_fn("deadband", |value: f64, center: f64, width: f64| -> f64 {
        if (value - center).abs() < width / 2.0 {
            center
        } else {
            value
        }
    });

    engine.register_fn("clamp", |x: f64, min: f64, max: f64| {
        if min > max {
            warn!(min, max, "clamp called with inverted bounds");
            x
        } else {
            x.clamp(min, max)
        }
    });

    engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);

    engine.register_fn(
        "map_range",
        |x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64| {
            (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
        },
    );
}
