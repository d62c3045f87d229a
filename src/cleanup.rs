//! Deferred teardown of resources acquired during a job.
//!
//! [`EmergencyCleanup`] is the single pending-cleanup slot shared by the
//! platforms of one job; the outermost flow owns it so that any cleanup
//! still pending when the flow unwinds runs on drop. [`CleanupGuard`] is the
//! scoped variant used for resources owned by one function.

use std::cell::RefCell;
use std::fmt;

/// Boxed cleanup action.
pub type CleanupFn<'a> = Box<dyn FnOnce() + 'a>;

/// Single-slot cleanup registry.
///
/// Registering overwrites the pending action rather than stacking it, and a
/// pending action runs at most once.
pub struct EmergencyCleanup<'a> {
    pending: RefCell<Option<CleanupFn<'a>>>,
    run_on_drop: bool,
}

impl<'a> EmergencyCleanup<'a> {
    /// Creates a registry that runs any pending action when dropped.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(None),
            run_on_drop: true,
        }
    }

    /// Creates a registry that discards pending actions when dropped.
    #[must_use]
    pub fn without_exit_guard() -> Self {
        Self {
            pending: RefCell::new(None),
            run_on_drop: false,
        }
    }

    /// Sets the pending action, or clears it when `cleanup` is `None`.
    pub fn register(&self, cleanup: Option<CleanupFn<'a>>) {
        *self.pending.borrow_mut() = cleanup;
    }

    /// Sets `cleanup` as the pending action.
    pub fn arm(&self, cleanup: impl FnOnce() + 'a) {
        self.register(Some(Box::new(cleanup)));
    }

    /// Runs and clears the pending action. Returns `false` when nothing was
    /// pending.
    pub fn invoke(&self) -> bool {
        let pending = self.pending.borrow_mut().take();
        pending.is_some_and(|cleanup| {
            cleanup();
            true
        })
    }

    /// Runs the pending action, then hands `result` back to the caller.
    pub fn bombout<T>(&self, result: T) -> T {
        self.invoke();
        result
    }

    /// Returns `true` when an action is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.borrow().is_some()
    }
}

impl Default for EmergencyCleanup<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EmergencyCleanup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmergencyCleanup")
            .field("armed", &self.is_armed())
            .field("run_on_drop", &self.run_on_drop)
            .finish()
    }
}

impl Drop for EmergencyCleanup<'_> {
    fn drop(&mut self) {
        if !self.run_on_drop {
            return;
        }
        if self.invoke() {
            tracing::warn!("ran pending emergency cleanup during shutdown");
        }
    }
}

/// Scoped cleanup action that runs when dropped unless disarmed.
#[must_use = "dropping the guard immediately runs its cleanup"]
pub struct CleanupGuard<'a> {
    action: Option<CleanupFn<'a>>,
}

impl<'a> CleanupGuard<'a> {
    /// Arms a guard around `action`.
    pub fn new(action: impl FnOnce() + 'a) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Drops the action without running it.
    pub fn disarm(mut self) {
        self.action = None;
    }

    /// Runs the action now.
    pub fn run(mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl fmt::Debug for CleanupGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("armed", &self.action.is_some())
            .finish()
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}
