//! Ordered teardown callback list shared by `Context` and `SharedValue`.
//!
//! Callbacks run sequentially, in reverse registration order, each receiving
//! the error the owning scope is closing with (if any). A single uniform
//! signature — `FnOnce(Option<&CoreError>) -> future` — replaces runtime arity
//! inspection: callers pick between a sync and an async registration method
//! instead of the callback being introspected.

use std::future::Future;
use std::pin::Pin;

use crate::error::CoreError;

pub(crate) type BoxFutureUnit = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default)]
pub(crate) struct TeardownList {
    callbacks: Vec<Box<dyn FnOnce(Option<&CoreError>) -> BoxFutureUnit + Send>>,
}

impl TeardownList {
    pub(crate) fn push_sync<F>(&mut self, f: F)
    where
        F: FnOnce(Option<&CoreError>) + Send + 'static,
    {
        self.callbacks
            .push(Box::new(move |err| {
                f(err);
                Box::pin(async {})
            }));
    }

    pub(crate) fn push_async<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(Option<&CoreError>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks
            .push(Box::new(move |err| Box::pin(f(err))));
    }

    /// Run every callback once, in reverse registration order (LIFO), passing
    /// the same error reference to each.
    pub(crate) async fn run_reverse(&mut self, error: Option<&CoreError>) {
        while let Some(f) = self.callbacks.pop() {
            f(error).await;
        }
    }
}
