//! Observability hooks for the module runtime.
//!
//! High-frequency paths (borrow/drop, put/get) check [`RuntimeObserver::is_noop`]
//! once and skip instrumentation entirely when nothing is registered, so a tree
//! built with the default observer pays nothing for diagnostics it never asked
//! for. Coarse-grained lifecycle events (phase transitions, captured exceptions,
//! the `exit` event firing) always go through [`TracingObserver`], which forwards
//! them to `tracing`.

use std::sync::Arc;

use crate::error::CoreError;

/// Hooks fed by the runtime's hot and cold paths.
///
/// All methods default to doing nothing, so implementors only override the
/// events they care about.
pub trait RuntimeObserver: Send + Sync {
    /// Whether this observer implementation does nothing at all. Hot paths
    /// use this to skip building event data when no observer is listening.
    fn is_noop(&self) -> bool {
        false
    }

    /// A module entered a phase (`prepare`, `start`, or `stop`).
    fn module_phase_entered(&self, _path: &str, _phase: &str) {}

    /// A module's phase (including its whole subtree) completed.
    fn module_phase_completed(&self, _path: &str, _phase: &str) {}

    /// A value was published into a [`crate::Context`].
    fn value_published(&self, _context_path: &str, _type_name: &'static str) {}

    /// A value was borrowed out of a [`crate::Context`].
    fn value_borrowed(&self, _context_path: &str, _type_name: &'static str) {}

    /// An exception was captured into the tree's root exception list.
    fn exception_captured(&self, _path: &str, _error: &CoreError) {}

    /// The root `exit` event was set.
    fn exit_signalled(&self, _path: &str) {}
}

/// An observer that does nothing. The default for a tree that hasn't opted
/// into diagnostics.
#[derive(Default, Clone, Copy)]
pub struct NoopObserver;

impl RuntimeObserver for NoopObserver {
    fn is_noop(&self) -> bool {
        true
    }
}

/// The default non-trivial observer: forwards every event to `tracing` at an
/// appropriate level (`debug` for phase transitions and value traffic, `warn`
/// for captured exceptions and the exit signal).
#[derive(Default, Clone, Copy)]
pub struct TracingObserver;

impl RuntimeObserver for TracingObserver {
    fn module_phase_entered(&self, path: &str, phase: &str) {
        tracing::debug!(module = path, phase, "entering phase");
    }

    fn module_phase_completed(&self, path: &str, phase: &str) {
        tracing::debug!(module = path, phase, "phase completed");
    }

    fn value_published(&self, context_path: &str, type_name: &'static str) {
        tracing::debug!(context = context_path, r#type = type_name, "value published");
    }

    fn value_borrowed(&self, context_path: &str, type_name: &'static str) {
        tracing::debug!(context = context_path, r#type = type_name, "value borrowed");
    }

    fn exception_captured(&self, path: &str, error: &CoreError) {
        tracing::warn!(module = path, error = %error, "exception captured");
    }

    fn exit_signalled(&self, path: &str) {
        tracing::warn!(module = path, "exit signalled");
    }
}

/// A shared handle to whatever observer a tree was built with.
pub type SharedObserver = Arc<dyn RuntimeObserver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_observer_reports_itself_as_noop() {
        assert!(NoopObserver.is_noop());
        assert!(!TracingObserver.is_noop());
    }
}
