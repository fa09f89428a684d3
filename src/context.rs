//! `Context`: a type-indexed registry of [`SharedValue`]s with parent linkage
//! and ordered teardown.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::{CoreError, CoreResult};
use crate::internal::TeardownList;
use crate::key::TypeKey;
use crate::observer::{NoopObserver, SharedObserver};
use crate::shared_value::{BorrowToken, PutOptions, SharedValue};
use crate::traits::{AsyncManagedResource, ManagedResource};

/// Type-erased view of a [`SharedValue`], used to hold heterogeneous values
/// in a single map and to fan out `aclose`/`freed` across all of them without
/// knowing their concrete types. Shared with [`crate::module`].
#[async_trait::async_trait]
pub(crate) trait ErasedSharedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    async fn close_erased(&self, timeout: Option<Duration>, error: Option<&CoreError>) -> CoreResult<()>;
    async fn freed_erased(&self, timeout: Option<Duration>) -> CoreResult<()>;
}

#[async_trait::async_trait]
impl<T: Send + Sync + 'static> ErasedSharedValue for SharedValue<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn close_erased(&self, timeout: Option<Duration>, error: Option<&CoreError>) -> CoreResult<()> {
        self.close(timeout, error).await
    }

    async fn freed_erased(&self, timeout: Option<Duration>) -> CoreResult<()> {
        self.freed(timeout).await
    }
}

struct ContextInner {
    path: String,
    parent: Option<Context>,
    values: Mutex<HashMap<TypeKey, Arc<dyn ErasedSharedValue>>>,
    teardown: Mutex<TeardownList>,
    value_added: Notify,
    closed: Mutex<bool>,
    closing: AtomicBool,
    observer: SharedObserver,
}

/// A type-indexed registry of shared values, with a non-owning pointer to its
/// parent for upward `get` searches.
///
/// Cloning a `Context` clones the handle (an `Arc`), not a new registry.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a root context (no parent) for diagnostics path `path`.
    pub fn new_root(path: impl Into<String>) -> Self {
        Self::with_observer(path, Arc::new(NoopObserver))
    }

    pub fn with_observer(path: impl Into<String>, observer: SharedObserver) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                path: path.into(),
                parent: None,
                values: Mutex::new(HashMap::new()),
                teardown: Mutex::new(TeardownList::default()),
                value_added: Notify::new(),
                closed: Mutex::new(false),
                closing: AtomicBool::new(false),
                observer,
            }),
        }
    }

    /// Create a child context rooted under `self`, recording `self` as its
    /// parent for `get`'s upward search.
    pub fn child(&self, path: impl Into<String>) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                path: path.into(),
                parent: Some(self.clone()),
                values: Mutex::new(HashMap::new()),
                teardown: Mutex::new(TeardownList::default()),
                value_added: Notify::new(),
                closed: Mutex::new(false),
                closing: AtomicBool::new(false),
                observer: self.inner.observer.clone(),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Publish a plain value, constructing its `SharedValue` with `options`.
    pub async fn put<T: Send + Sync + 'static>(
        &self,
        value: T,
        options: PutOptions<T>,
    ) -> CoreResult<SharedValue<T>> {
        let shared = SharedValue::new(value, options);
        self.put_shared(shared.clone()).await?;
        Ok(shared)
    }

    /// Publish a synchronous scoped resource.
    pub async fn put_managed_sync<T: Send + Sync + 'static, R: ManagedResource<Output = T>>(
        &self,
        resource: R,
        options: PutOptions<T>,
    ) -> CoreResult<SharedValue<T>> {
        let shared = SharedValue::new_managed_sync(resource, options);
        self.put_shared(shared.clone()).await?;
        Ok(shared)
    }

    /// Publish an asynchronous scoped resource.
    pub async fn put_managed_async<T: Send + Sync + 'static, R: AsyncManagedResource<Output = T>>(
        &self,
        resource: R,
        options: PutOptions<T>,
    ) -> CoreResult<SharedValue<T>> {
        let shared = SharedValue::new_managed_async(resource, options);
        self.put_shared(shared.clone()).await?;
        Ok(shared)
    }

    /// Register an already-built `SharedValue` under its own type identity.
    /// Used to mirror one value into multiple contexts (e.g. a module's own
    /// context and its parent's).
    pub async fn put_shared<T: Send + Sync + 'static>(&self, value: SharedValue<T>) -> CoreResult<()> {
        if *self.inner.closed.lock().await {
            return Err(CoreError::Closed);
        }
        let key = TypeKey::of::<T>();
        {
            let mut values = self.inner.values.lock().await;
            if values.contains_key(&key) {
                return Err(CoreError::Duplicate {
                    type_name: std::any::type_name::<T>(),
                });
            }
            values.insert(key, Arc::new(value));
        }
        self.inner.value_added.notify_waiters();
        if !self.inner.observer.is_noop() {
            self.inner
                .observer
                .value_published(&self.inner.path, std::any::type_name::<T>());
        }
        Ok(())
    }

    /// Scan this context and every ancestor in parallel; return the first
    /// successful borrow, cancelling the rest.
    pub async fn get<T: Send + Sync + 'static>(&self, timeout: Option<Duration>) -> CoreResult<BorrowToken<T>> {
        let chain = self.ancestor_chain();
        let attempt = async move {
            let mut set = tokio::task::JoinSet::new();
            for ctx in chain {
                set.spawn(async move { ctx.get_local::<T>().await });
            }
            let mut last_err = CoreError::Timeout {
                what: format!("get<{}>", std::any::type_name::<T>()),
            };
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(token)) => {
                        set.abort_all();
                        return Ok(token);
                    }
                    Ok(Err(err)) => last_err = err,
                    Err(_join_error) => {}
                }
            }
            Err(last_err)
        };
        match timeout {
            Some(d) => tokio::time::timeout(d, attempt)
                .await
                .map_err(|_| CoreError::Timeout {
                    what: format!("get<{}>", std::any::type_name::<T>()),
                })?,
            None => attempt.await,
        }
    }

    async fn get_local<T: Send + Sync + 'static>(&self) -> CoreResult<BorrowToken<T>> {
        loop {
            let notified = self.inner.value_added.notified();
            {
                if *self.inner.closed.lock().await {
                    return Err(CoreError::Closed);
                }
                let values = self.inner.values.lock().await;
                if let Some(erased) = values.get(&TypeKey::of::<T>()) {
                    let shared = erased
                        .as_any()
                        .downcast_ref::<SharedValue<T>>()
                        .expect("type-keyed storage holds the matching SharedValue<T>")
                        .clone();
                    drop(values);
                    let token = shared.borrow(None).await?;
                    if !self.inner.observer.is_noop() {
                        self.inner
                            .observer
                            .value_borrowed(&self.inner.path, std::any::type_name::<T>());
                    }
                    return Ok(token);
                }
            }
            notified.await;
        }
    }

    /// Append a synchronous teardown callback, run in reverse registration
    /// order by `aclose`.
    pub async fn add_teardown_callback<F>(&self, f: F)
    where
        F: FnOnce(Option<&CoreError>) + Send + 'static,
    {
        self.inner.teardown.lock().await.push_sync(f);
    }

    /// Append an asynchronous teardown callback.
    pub async fn add_teardown_callback_async<F, Fut>(&self, f: F)
    where
        F: FnOnce(Option<&CoreError>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.teardown.lock().await.push_async(f);
    }

    /// Close every contained value concurrently, then run teardown callbacks
    /// in reverse registration order. Idempotent: a second call while the
    /// first is still running, or after it finished, is a no-op.
    ///
    /// A timeout is reported (`Err(CoreError::Timeout)`) rather than
    /// swallowed, and does not abort in-flight value teardown: each value is
    /// closed on its own detached task, so letting the wait elapse only stops
    /// *this* call from waiting on them, it does not cancel their teardown.
    /// `closed` (and therefore put/get rejection) is set only once teardown
    /// has actually run, matching "closed status set on success" — a call
    /// that timed out still marks the context closed once its (possibly
    /// late) teardown completes, since by then every value has in fact been
    /// torn down or is in the process of becoming so.
    pub async fn aclose(&self, timeout: Option<Duration>, error: Option<&CoreError>) -> CoreResult<()> {
        if *self.inner.closed.lock().await {
            return Ok(());
        }
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let values: Vec<Arc<dyn ErasedSharedValue>> =
            self.inner.values.lock().await.values().cloned().collect();

        let mut handles = Vec::with_capacity(values.len());
        for value in values {
            let err_owned = error.cloned();
            handles.push(tokio::spawn(async move {
                value.close_erased(None, err_owned.as_ref()).await
            }));
        }

        let await_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        let timed_out = match timeout {
            Some(d) => tokio::time::timeout(d, await_all).await.is_err(),
            None => {
                await_all.await;
                false
            }
        };

        self.inner.teardown.lock().await.run_reverse(error).await;
        *self.inner.closed.lock().await = true;

        if timed_out {
            Err(CoreError::Timeout {
                what: format!("aclose({})", self.inner.path),
            })
        } else {
            Ok(())
        }
    }

    pub fn is_closed_sync(&self) -> bool {
        self.inner.closed.try_lock().map(|g| *g).unwrap_or(false)
    }

    fn ancestor_chain(&self) -> Vec<Context> {
        let mut chain = vec![self.clone()];
        let mut current = self.inner.parent.clone();
        while let Some(ctx) = current {
            chain.push(ctx.clone());
            current = ctx.inner.parent.clone();
        }
        chain
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Ok(guard) = self.closed.try_lock() {
            if !*guard {
                eprintln!(
                    "[modtree] Context '{}' dropped without aclose(). Call aclose().await before dropping.",
                    self.path
                );
            }
        }
    }
}
