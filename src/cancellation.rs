//! One-shot, level-triggered events used for phase completion and the tree-wide
//! exit signal.
//!
//! The root module's `exit` event is the global cancellation signal described in
//! the concurrency model: setting it races against every module's own teardown,
//! whichever finishes first releases that module. `prepared`/`started`/`stopped`
//! are the same primitive used per-phase, per-node.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A flag that starts unset, can be set exactly once, and can be awaited by
/// any number of tasks — including tasks that start waiting after it was set.
///
/// This is the "missed wakeup"-safe pattern: a waiter always rechecks the flag
/// after registering interest with [`Notify`], so a `set()` that races with a
/// `wait()` can never be lost.
#[derive(Default)]
pub struct OnceEvent {
    flag: AtomicBool,
    notify: Notify,
}

impl OnceEvent {
    /// Create a new, unset event.
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Set the event. Idempotent: setting an already-set event is a no-op.
    pub fn set(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Returns true if the event has been set.
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until the event is set. Returns immediately if it already is.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn unset_by_default() {
        let event = OnceEvent::new();
        assert!(!event.is_set());
    }

    #[tokio::test]
    async fn wait_returns_immediately_once_set() {
        let event = OnceEvent::new();
        event.set();
        assert!(event.is_set());
        event.wait().await;
    }

    #[tokio::test]
    async fn set_is_idempotent() {
        let event = OnceEvent::new();
        event.set();
        event.set();
        assert!(event.is_set());
    }

    #[tokio::test]
    async fn waiter_started_before_set_is_woken() {
        let event = Arc::new(OnceEvent::new());
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move {
                event.wait().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        event.set();
        waiter.await.unwrap();
    }
}
