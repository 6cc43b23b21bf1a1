//! Binding a filter to its script
//!
//! A script named `scale` lives at `<scripts dir>/scale.rhai` and must
//! define `fn scale(readings)` plus `fn set_filter_config(config)`. Binding
//! compiles the file, checks both entry points exist and runs the script's
//! top-level statements once.
//!
//! Every binding carries an object map bound as `this` for all calls into
//! the script, so configuration applied through `set_filter_config` is
//! visible to later filter calls:
//!
//! ```rhai
//! fn set_filter_config(config) {
//!     this.factor = parse_json(config).factor;
//! }
//!
//! fn scale(readings) {
//!     for i in 0..readings.len() {
//!         for asset in readings[i].keys() {
//!             readings[i][asset].readings.temperature *= this.factor;
//!         }
//!     }
//!     readings
//! }
//! ```
//!
//! Calls do not re-run top-level statements, so modules a function needs
//! should be imported inside that function.

use crate::config::{CONFIG_ENTRY_POINT, SCRIPT_EXTENSION};
use crate::error::{FilterError, Result};
use crate::scripting::runtime::Interpreter;
use parking_lot::Mutex;
use rhai::{CallFnOptions, Dynamic, Map, Scope, AST};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where a named script lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLocation {
    name: String,
    path: PathBuf,
}

impl ScriptLocation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether `name` can be used as a script function name
pub fn is_valid_script_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A loaded script and its persistent `this` state
pub struct ScriptBinding {
    location: ScriptLocation,
    ast: AST,
    state: Mutex<Dynamic>,
}

impl ScriptBinding {
    /// Locate the script for `script_name` under `scripts_dir`.
    ///
    /// Returns `None` for an empty name. The file is not checked here.
    pub fn resolve(scripts_dir: &Path, script_name: &str) -> Option<ScriptLocation> {
        let name = script_name.trim();
        if name.is_empty() {
            return None;
        }
        Some(ScriptLocation {
            name: name.to_string(),
            path: scripts_dir.join(format!("{name}.{SCRIPT_EXTENSION}")),
        })
    }

    /// Load the script and check its entry points.
    ///
    /// On failure nothing is retained.
    pub fn bind(interpreter: &Interpreter, location: ScriptLocation) -> Result<Self> {
        let fail = |message: String| FilterError::Binding {
            script: location.name.clone(),
            message,
        };

        if !is_valid_script_name(&location.name) {
            return Err(fail(format!(
                "'{}' is not a valid function name",
                location.name
            )));
        }
        if !location.path.is_file() {
            return Err(fail(format!("script file {:?} not found", location.path)));
        }

        let engine = interpreter.engine();
        let ast = engine
            .compile_file(location.path.clone())
            .map_err(|e| fail(e.to_string()))?;

        for entry_point in [location.name.as_str(), CONFIG_ENTRY_POINT] {
            if !defines_function(&ast, entry_point, 1) {
                return Err(fail(format!(
                    "script does not define function '{entry_point}(arg)'"
                )));
            }
        }

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| fail(format!("top-level statements failed: {e}")))?;

        info!(script = %location.name, path = ?location.path, "Bound filter script");

        Ok(Self {
            location,
            ast,
            state: Mutex::new(Dynamic::from_map(Map::new())),
        })
    }

    /// The script (and filter function) name
    pub fn name(&self) -> &str {
        &self.location.name
    }

    pub fn location(&self) -> &ScriptLocation {
        &self.location
    }

    /// Call the filter function with the marshaled readings.
    pub fn invoke(&self, interpreter: &Interpreter, readings: Dynamic) -> Result<Dynamic> {
        self.call(interpreter, &self.location.name, readings)
    }

    /// Hand the JSON configuration text to `set_filter_config`.
    ///
    /// The call runs against a copy of the script state, which replaces the
    /// live state only if the script accepts the configuration. Writes made
    /// to `this` before a rejection are discarded.
    pub fn apply_config(&self, interpreter: &Interpreter, config: &str) -> Result<()> {
        let mut state = self.state.lock();
        let mut staged = state.clone();
        self.call_with_state(
            interpreter,
            CONFIG_ENTRY_POINT,
            Dynamic::from(config.to_string()),
            &mut staged,
        )?;
        *state = staged;
        Ok(())
    }

    fn call(&self, interpreter: &Interpreter, function: &str, arg: Dynamic) -> Result<Dynamic> {
        let mut state = self.state.lock();
        self.call_with_state(interpreter, function, arg, &mut state)
    }

    fn call_with_state(
        &self,
        interpreter: &Interpreter,
        function: &str,
        arg: Dynamic,
        state: &mut Dynamic,
    ) -> Result<Dynamic> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(state);

        debug!(script = %self.location.name, function, "Calling script");
        interpreter
            .engine()
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, function, (arg,))
            .map_err(|e| FilterError::from_rhai_error(function, e))
    }
}

fn defines_function(ast: &AST, name: &str, arity: usize) -> bool {
    ast.iter_functions()
        .any(|f| f.name == name && f.params.len() == arity)
}

impl std::fmt::Debug for ScriptBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBinding")
            .field("name", &self.location.name)
            .field("path", &self.location.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::{ExecutionLock, InterpreterHandle};
    use serial_test::serial;
    use std::fs;

    const DOUBLER: &str = r#"
        let loaded = true;

        fn set_filter_config(config) {
            this.factor = parse_json(config).factor;
        }

        fn doubler(value) {
            let factor = if "factor" in this { this.factor } else { 2 };
            value * factor
        }
    "#;

    fn write_script(dir: &Path, name: &str, source: &str) {
        fs::write(dir.join(format!("{name}.rhai")), source).unwrap();
    }

    #[test]
    fn test_resolve() {
        let dir = Path::new("/srv/scripts");
        let location = ScriptBinding::resolve(dir, "scale").unwrap();
        assert_eq!(location.name(), "scale");
        assert_eq!(location.path(), Path::new("/srv/scripts/scale.rhai"));

        assert!(ScriptBinding::resolve(dir, "").is_none());
        assert!(ScriptBinding::resolve(dir, "   ").is_none());
    }

    #[test]
    fn test_script_names() {
        assert!(is_valid_script_name("scale"));
        assert!(is_valid_script_name("_scale_2"));
        assert!(!is_valid_script_name("2scale"));
        assert!(!is_valid_script_name("scale-factor"));
        assert!(!is_valid_script_name("../etc"));
    }

    #[test]
    #[serial]
    fn test_bind_invoke_and_configure() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "doubler", DOUBLER);
        let handle = InterpreterHandle::acquire(dir.path()).unwrap();

        {
            let guard = ExecutionLock::acquire();
            let interpreter = guard.interpreter().unwrap();
            let location = ScriptBinding::resolve(dir.path(), "doubler").unwrap();
            let binding = ScriptBinding::bind(interpreter, location).unwrap();

            let out = binding.invoke(interpreter, Dynamic::from_int(4)).unwrap();
            assert_eq!(out.as_int().unwrap(), 8);

            binding.apply_config(interpreter, r#"{"factor": 5}"#).unwrap();
            let out = binding.invoke(interpreter, Dynamic::from_int(4)).unwrap();
            assert_eq!(out.as_int().unwrap(), 20);
        }

        drop(handle);
    }

    #[test]
    #[serial]
    fn test_bind_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "no_config",
            "fn no_config(readings) { readings }",
        );
        write_script(
            dir.path(),
            "wrong_name",
            "fn set_filter_config(c) {} fn other(readings) { readings }",
        );
        write_script(dir.path(), "broken", "fn broken(readings { ");
        let handle = InterpreterHandle::acquire(dir.path()).unwrap();

        {
            let guard = ExecutionLock::acquire();
            let interpreter = guard.interpreter().unwrap();
            for name in ["no_config", "wrong_name", "broken", "absent"] {
                let location = ScriptBinding::resolve(dir.path(), name).unwrap();
                let err = ScriptBinding::bind(interpreter, location).unwrap_err();
                assert!(matches!(err, FilterError::Binding { .. }), "{name}: {err}");
            }
        }

        drop(handle);
    }

    #[test]
    #[serial]
    fn test_rejected_config_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "guarded",
            r#"fn set_filter_config(config) {
                   this.factor = parse_json(config).factor;
                   if this.factor < 0 { throw "negative factor"; }
               }
               fn guarded(value) { value * this.factor }"#,
        );
        let handle = InterpreterHandle::acquire(dir.path()).unwrap();

        {
            let guard = ExecutionLock::acquire();
            let interpreter = guard.interpreter().unwrap();
            let location = ScriptBinding::resolve(dir.path(), "guarded").unwrap();
            let binding = ScriptBinding::bind(interpreter, location).unwrap();

            binding.apply_config(interpreter, r#"{"factor": 4}"#).unwrap();
            binding
                .apply_config(interpreter, r#"{"factor": -1}"#)
                .unwrap_err();

            let out = binding.invoke(interpreter, Dynamic::from_int(2)).unwrap();
            assert_eq!(out.as_int().unwrap(), 8);

            binding.apply_config(interpreter, r#"{"factor": 3}"#).unwrap();
            let out = binding.invoke(interpreter, Dynamic::from_int(2)).unwrap();
            assert_eq!(out.as_int().unwrap(), 6);
        }

        drop(handle);
    }

    #[test]
    #[serial]
    fn test_raised_error_is_invocation_error() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "thrower",
            r#"fn set_filter_config(c) { throw "bad config"; }
               fn thrower(readings) { throw "boom"; }"#,
        );
        let handle = InterpreterHandle::acquire(dir.path()).unwrap();

        {
            let guard = ExecutionLock::acquire();
            let interpreter = guard.interpreter().unwrap();
            let location = ScriptBinding::resolve(dir.path(), "thrower").unwrap();
            let binding = ScriptBinding::bind(interpreter, location).unwrap();

            let err = binding.invoke(interpreter, Dynamic::UNIT).unwrap_err();
            assert!(err.to_string().contains("boom"));
            let err = binding.apply_config(interpreter, "{}").unwrap_err();
            assert!(matches!(err, FilterError::Invocation { ref function, .. } if function == CONFIG_ENTRY_POINT));
        }

        drop(handle);
    }
}
