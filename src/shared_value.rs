//! `SharedValue<T>` and `BorrowToken<T>`: the publish/borrow primitive that
//! backs [`crate::Context`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::{CoreError, CoreResult};
use crate::internal::teardown::BoxFutureUnit;
use crate::traits::{AsyncManagedResource, ManagedResource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SharedState {
    Open,
    Closing,
    Closed,
}

trait ManagedResourceObj<T>: Send + Sync {
    fn setup(&self) -> T;
    fn teardown(&self, output: T, error: Option<&CoreError>);
}

impl<R> ManagedResourceObj<R::Output> for R
where
    R: ManagedResource,
{
    fn setup(&self) -> R::Output {
        ManagedResource::setup(self)
    }

    fn teardown(&self, output: R::Output, error: Option<&CoreError>) {
        ManagedResource::teardown(self, output, error)
    }
}

#[async_trait::async_trait]
trait AsyncManagedResourceObj<T>: Send + Sync {
    async fn setup(&self) -> T;
    async fn teardown(&self, output: T, error: Option<&CoreError>);
}

#[async_trait::async_trait]
impl<R> AsyncManagedResourceObj<R::Output> for R
where
    R: AsyncManagedResource,
{
    async fn setup(&self) -> R::Output {
        AsyncManagedResource::setup(self).await
    }

    async fn teardown(&self, output: R::Output, error: Option<&CoreError>) {
        AsyncManagedResource::teardown(self, output, error).await
    }
}

enum ManageSource<T> {
    Sync(Box<dyn ManagedResourceObj<T>>),
    Async(Box<dyn AsyncManagedResourceObj<T>>),
}

type TeardownFn<T> = Box<dyn FnOnce(Option<&CoreError>) -> BoxFutureUnit + Send>;

struct Inner<T: Send + Sync + 'static> {
    value: RwLock<Option<Arc<T>>>,
    manage: Mutex<Option<ManageSource<T>>>,
    state: Mutex<SharedState>,
    borrowers: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    max_borrowers: usize,
    drop_notify: Notify,
    close_timeout: Option<Duration>,
    teardown_callback: Mutex<Option<TeardownFn<T>>>,
}

/// A wrapper around a user value that tracks live borrowers and, optionally,
/// a scoped-resource setup/teardown pair.
///
/// Cloning a `SharedValue` clones the handle, not the value — clones share the
/// same borrower set and state, which is how a value published in one
/// [`crate::Context`] can be mirrored into another.
pub struct SharedValue<T: Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Borrower-capacity and teardown options shared by every construction path.
pub struct PutOptions<T: Send + Sync + 'static> {
    pub max_borrowers: usize,
    pub close_timeout: Option<Duration>,
    teardown_callback: Option<TeardownFn<T>>,
}

impl<T: Send + Sync + 'static> Default for PutOptions<T> {
    fn default() -> Self {
        Self {
            max_borrowers: usize::MAX,
            close_timeout: None,
            teardown_callback: None,
        }
    }
}

impl<T: Send + Sync + 'static> PutOptions<T> {
    pub fn with_max_borrowers(mut self, n: usize) -> Self {
        self.max_borrowers = n;
        self
    }

    pub fn with_close_timeout(mut self, d: Duration) -> Self {
        self.close_timeout = Some(d);
        self
    }

    pub fn with_teardown_callback<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<&CoreError>) + Send + 'static,
    {
        self.teardown_callback = Some(Box::new(move |err| {
            f(err);
            Box::pin(async {})
        }));
        self
    }

    pub fn with_async_teardown_callback<F, Fut>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<&CoreError>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.teardown_callback = Some(Box::new(move |err| Box::pin(f(err))));
        self
    }
}

impl<T: Send + Sync + 'static> SharedValue<T> {
    fn from_parts(initial: Option<Arc<T>>, manage: Option<ManageSource<T>>, options: PutOptions<T>) -> Self {
        let inner = Inner {
            value: RwLock::new(initial),
            manage: Mutex::new(manage),
            state: Mutex::new(SharedState::Open),
            borrowers: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            max_borrowers: options.max_borrowers,
            drop_notify: Notify::new(),
            close_timeout: options.close_timeout,
            teardown_callback: Mutex::new(options.teardown_callback),
        };
        SharedValue {
            inner: Arc::new(inner),
        }
    }

    /// Wrap `value` directly. `manage` is not set; `borrow` always returns
    /// the same value.
    pub fn new(value: T, options: PutOptions<T>) -> Self {
        Self::from_parts(Some(Arc::new(value)), None, options)
    }

    /// Wrap a resource descriptor that exposes the synchronous scoped-resource
    /// protocol. `setup()` runs on first `open`/`borrow`, not at construction.
    pub fn new_managed_sync<R: ManagedResource<Output = T>>(resource: R, options: PutOptions<T>) -> Self {
        Self::from_parts(None, Some(ManageSource::Sync(Box::new(resource))), options)
    }

    /// Wrap a resource descriptor that exposes the asynchronous scoped-resource
    /// protocol. The caller picks this constructor or `new_managed_sync`
    /// explicitly; nothing probes a value for which protocol it implements.
    pub fn new_managed_async<R: AsyncManagedResource<Output = T>>(resource: R, options: PutOptions<T>) -> Self {
        Self::from_parts(None, Some(ManageSource::Async(Box::new(resource))), options)
    }

    /// Acquire the scoped resource if `manage` is set and it hasn't been
    /// opened yet. Idempotent. Normally triggered implicitly by the first
    /// [`SharedValue::borrow`]; exposed for callers that need the value ready
    /// before any borrower arrives.
    pub async fn open(&self) {
        if self.inner.value.read().await.is_some() {
            return;
        }
        let mut guard = self.inner.value.write().await;
        if guard.is_some() {
            return;
        }
        let manage = self.inner.manage.lock().await;
        match manage.as_ref() {
            Some(ManageSource::Async(r)) => {
                let out = r.setup().await;
                *guard = Some(Arc::new(out));
            }
            Some(ManageSource::Sync(r)) => {
                let out = r.setup();
                *guard = Some(Arc::new(out));
            }
            None => {}
        }
    }

    /// Borrow the value, waiting for capacity if the borrower set is full.
    pub async fn borrow(&self, timeout: Option<Duration>) -> CoreResult<BorrowToken<T>> {
        let needs_open =
            self.inner.manage.lock().await.is_some() && self.inner.value.read().await.is_none();
        if needs_open {
            self.open().await;
        }

        let admit = async {
            loop {
                let notified = self.inner.drop_notify.notified();
                {
                    let state = *self.inner.state.lock().await;
                    if state != SharedState::Open {
                        return Err(CoreError::Closed);
                    }
                    let mut borrowers = self.inner.borrowers.lock().await;
                    if borrowers.len() < self.inner.max_borrowers {
                        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                        borrowers.insert(id);
                        let arc = self
                            .inner
                            .value
                            .read()
                            .await
                            .clone()
                            .expect("open shared value always has a value");
                        return Ok(BorrowToken {
                            id,
                            arc: Some(arc),
                            released: AtomicBool::new(false),
                            owner: self.inner.clone(),
                        });
                    }
                }
                notified.await;
            }
        };

        match timeout {
            Some(d) => tokio::time::timeout(d, admit)
                .await
                .map_err(|_| CoreError::Timeout {
                    what: "borrow".to_string(),
                })?,
            None => admit.await,
        }
    }

    /// Complete when the borrower set is empty. Returns immediately if it
    /// already is.
    pub async fn freed(&self, timeout: Option<Duration>) -> CoreResult<()> {
        let wait = async {
            loop {
                let notified = self.inner.drop_notify.notified();
                if self.inner.borrowers.lock().await.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        match timeout {
            Some(d) => tokio::time::timeout(d, wait)
                .await
                .map_err(|_| CoreError::Timeout {
                    what: "freed".to_string(),
                }),
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    /// Idempotent close: waits for `freed`, releases the scoped resource (if
    /// any), then invokes the teardown callback (if any).
    ///
    /// A `freed()` timeout does not skip release/teardown — both still run,
    /// matching the original's `move_on_after(timeout)` wrapping only the
    /// wait, not the rest of the close. The timeout is reported only after
    /// teardown has completed.
    pub async fn close(&self, timeout: Option<Duration>, error: Option<&CoreError>) -> CoreResult<()> {
        {
            let mut state = self.inner.state.lock().await;
            match *state {
                SharedState::Closing | SharedState::Closed => return Ok(()),
                SharedState::Open => *state = SharedState::Closing,
            }
        }

        let effective_timeout = timeout.or(self.inner.close_timeout);
        let freed_result = self.freed(effective_timeout).await;

        if let Some(manage) = self.inner.manage.lock().await.take() {
            let value = self.inner.value.write().await.take();
            if let Some(arc) = value {
                match Arc::try_unwrap(arc) {
                    Ok(owned) => match manage {
                        ManageSource::Async(r) => r.teardown(owned, error).await,
                        ManageSource::Sync(r) => r.teardown(owned, error),
                    },
                    Err(_still_shared) => {
                        // freed() guarantees no outstanding borrow tokens; reaching this
                        // would mean an Arc clone escaped the borrow protocol.
                    }
                }
            }
        }

        if let Some(cb) = self.inner.teardown_callback.lock().await.take() {
            cb(error).await;
        }

        *self.inner.state.lock().await = SharedState::Closed;
        freed_result
    }
}

impl<T: Send + Sync + 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(guard) = self.state.try_lock() {
            if *guard != SharedState::Closed {
                eprintln!(
                    "[modtree] SharedValue dropped without close(). Call close().await before dropping."
                );
            }
        }
    }
}

/// A live borrow of a [`SharedValue`]'s inner value.
///
/// Dropping the token (either by going out of scope or via an explicit
/// [`BorrowToken::release`]) removes it from the borrower set and wakes any
/// task waiting in [`SharedValue::borrow`] or [`SharedValue::freed`].
/// `unwrap()` after release fails with [`CoreError::AlreadyDropped`].
pub struct BorrowToken<T: Send + Sync + 'static> {
    id: u64,
    arc: Option<Arc<T>>,
    released: AtomicBool,
    owner: Arc<Inner<T>>,
}

impl<T: Send + Sync + 'static> BorrowToken<T> {
    /// Access the borrowed value. Fails once the token has been released.
    pub fn unwrap(&self) -> CoreResult<&T> {
        if self.released.load(Ordering::Acquire) {
            Err(CoreError::AlreadyDropped)
        } else {
            Ok(self.arc.as_deref().expect("live token always holds a value"))
        }
    }

    /// Clone an owned handle to the borrowed value. Unlike `unwrap`, the
    /// returned `Arc` stays valid after this token is released or dropped —
    /// useful for callers that hand the value off to the token's owner (see
    /// [`crate::module::ModuleHandle::get`]).
    pub fn value(&self) -> CoreResult<Arc<T>> {
        if self.released.load(Ordering::Acquire) {
            Err(CoreError::AlreadyDropped)
        } else {
            Ok(self.arc.clone().expect("live token always holds a value"))
        }
    }

    /// Release this borrow early, without waiting for the token to go out of
    /// scope. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let owner = self.owner.clone();
            let id = self.id;
            tokio::spawn(async move {
                owner.borrowers.lock().await.remove(&id);
                owner.drop_notify.notify_waiters();
            });
        }
    }
}

impl<T: Send + Sync + 'static> Drop for BorrowToken<T> {
    fn drop(&mut self) {
        self.release();
    }
}
