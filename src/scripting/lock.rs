//! Process-wide execution lock
//!
//! The embedded interpreter has a single execution context. Every thread
//! that creates, inspects or destroys script values, or calls into a script,
//! must hold the [`ExecutionGuard`] for the whole of that work. The guard is
//! scoped: it is released when dropped, on every exit path.
//!
//! The lock also owns the interpreter's lifecycle state, so the only way to
//! reach the live [`Interpreter`] is through a guard. APIs that take
//! `&Interpreter` can therefore only be called with the lock held.

use crate::error::{FilterError, Result};
use crate::scripting::runtime::{Interpreter, Runtime};
use parking_lot::{Mutex, MutexGuard};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static EXECUTION_LOCK: Mutex<Runtime> = parking_lot::const_mutex(Runtime::new());

static ACQUISITIONS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static HELD: Cell<bool> = const { Cell::new(false) };
}

/// The global execution lock.
pub struct ExecutionLock;

impl ExecutionLock {
    /// Block until the lock is free, then take it.
    ///
    /// # Panics
    ///
    /// The lock is not reentrant. Acquiring it again on a thread that already
    /// holds it is a programming error and panics rather than deadlocking.
    pub fn acquire() -> ExecutionGuard {
        assert!(
            !Self::held_by_current_thread(),
            "ExecutionLock is not reentrant: this thread already holds it"
        );
        let inner = EXECUTION_LOCK.lock();
        HELD.with(|held| held.set(true));
        ACQUISITIONS.fetch_add(1, Ordering::Relaxed);
        ExecutionGuard { inner }
    }

    /// Whether the calling thread currently holds the lock.
    pub fn held_by_current_thread() -> bool {
        HELD.with(|held| held.get())
    }

    /// Total number of acquisitions since process start.
    pub fn acquisition_count() -> u64 {
        ACQUISITIONS.load(Ordering::Relaxed)
    }
}

/// Proof of holding the execution lock. Releases it on drop.
pub struct ExecutionGuard {
    inner: MutexGuard<'static, Runtime>,
}

impl ExecutionGuard {
    /// The live interpreter.
    ///
    /// Fails when the interpreter has not been started or was finalized.
    pub fn interpreter(&self) -> Result<&Interpreter> {
        self.inner.interpreter().ok_or_else(|| {
            FilterError::Lifecycle("embedded interpreter is not running".to_string())
        })
    }

    pub(crate) fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.inner
    }

    /// Run `f` with the lock transiently released, re-acquiring it before
    /// returning.
    ///
    /// `f` must not touch interpreter state. It may itself acquire the lock
    /// from this released baseline.
    pub fn suspend<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        HELD.with(|held| held.set(false));
        let result = MutexGuard::unlocked(&mut self.inner, f);
        HELD.with(|held| held.set(true));
        ACQUISITIONS.fetch_add(1, Ordering::Relaxed);
        result
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        HELD.with(|held| held.set(false));
    }
}

impl std::fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("interpreter_live", &self.inner.interpreter().is_some())
            .finish()
    }
}
