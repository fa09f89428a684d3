//! `Signal<T>`: a fan-out primitive with synchronous callbacks, asynchronous
//! callbacks, and streaming receivers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::mpsc;

/// A receiver obtained from [`Signal::iterate`]. Backed by a bounded channel;
/// a slow consumer applies backpressure to `emit`, not the other way around.
pub struct Receiver<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> Receiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }
}

/// A handle returned by [`Signal::connect`]/[`Signal::connect_async`], used to
/// later remove that callback with [`Signal::disconnect`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignalHandle(u64);

type SyncCallback<T> = Box<dyn Fn(&T) + Send + Sync>;
type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;
type AsyncCallback<T> = Box<dyn Fn(&T) -> BoxFuture + Send + Sync>;

struct State<T> {
    sync_callbacks: Vec<(SignalHandle, SyncCallback<T>)>,
    async_callbacks: Vec<(SignalHandle, AsyncCallback<T>)>,
    senders: Vec<mpsc::Sender<T>>,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        State {
            sync_callbacks: Vec::new(),
            async_callbacks: Vec::new(),
            senders: Vec::new(),
        }
    }
}

/// A fan-out broadcast point. Connect callbacks (sync or async) or obtain a
/// streaming [`Receiver`]; `emit` drives all three kinds for one value.
pub struct Signal<T: Clone + Send + Sync + 'static> {
    state: StdMutex<State<T>>,
    receiver_capacity: usize,
    next_handle: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    pub fn new() -> Self {
        Self::with_receiver_capacity(32)
    }

    pub fn with_receiver_capacity(capacity: usize) -> Self {
        Signal {
            state: StdMutex::new(State::default()),
            receiver_capacity: capacity,
            next_handle: AtomicU64::new(0),
        }
    }

    fn next_handle(&self) -> SignalHandle {
        SignalHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a synchronous callback, invoked inline during `emit`. The
    /// returned handle can be passed to [`Signal::disconnect`].
    pub fn connect<F>(&self, callback: F) -> SignalHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handle = self.next_handle();
        self.state
            .lock()
            .unwrap()
            .sync_callbacks
            .push((handle, Box::new(callback)));
        handle
    }

    /// Register an asynchronous callback, invoked concurrently with the other
    /// async callbacks during `emit`. The returned handle can be passed to
    /// [`Signal::disconnect`].
    pub fn connect_async<F, Fut>(&self, callback: F) -> SignalHandle
    where
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = self.next_handle();
        self.state
            .lock()
            .unwrap()
            .async_callbacks
            .push((handle, Box::new(move |value| Box::pin(callback(value)))));
        handle
    }

    /// Unregister a callback previously returned by `connect`/`connect_async`.
    /// A no-op if the handle doesn't match any currently connected callback
    /// (already disconnected, or from a different `Signal`).
    pub fn disconnect(&self, handle: SignalHandle) {
        let mut guard = self.state.lock().unwrap();
        guard.sync_callbacks.retain(|(h, _)| *h != handle);
        guard.async_callbacks.retain(|(h, _)| *h != handle);
    }

    /// Obtain a streaming receiver of future emissions. Past emissions are not
    /// replayed.
    pub fn iterate(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel(self.receiver_capacity);
        self.state.lock().unwrap().senders.push(tx);
        Receiver { inner: rx }
    }

    /// Broadcast `value` to every callback and receiver registered at the
    /// moment `emit` is called. Sync callbacks run inline first, then async
    /// callbacks run concurrently, then pending sends to receivers go out;
    /// receivers whose other end was dropped are pruned afterward.
    pub async fn emit(&self, value: T) {
        let senders: Vec<mpsc::Sender<T>> = self.state.lock().unwrap().senders.clone();

        // Run sync callbacks inline, holding the lock only for the duration of
        // each individual call rather than across the whole emit.
        {
            let guard = self.state.lock().unwrap();
            for (_, cb) in guard.sync_callbacks.iter() {
                cb(&value);
            }
        }

        let async_futures: Vec<_> = {
            let guard = self.state.lock().unwrap();
            guard
                .async_callbacks
                .iter()
                .map(|(_, cb)| cb(&value))
                .collect::<Vec<_>>()
        };
        let mut set = tokio::task::JoinSet::new();
        for fut in async_futures {
            set.spawn(fut);
        }
        while set.join_next().await.is_some() {}

        let mut broken = Vec::new();
        for (idx, sender) in senders.iter().enumerate() {
            if sender.send(value.clone()).await.is_err() {
                broken.push(idx);
            }
        }
        if !broken.is_empty() {
            let mut guard = self.state.lock().unwrap();
            let mut idx = 0;
            guard.senders.retain(|_| {
                let keep = !broken.contains(&idx);
                idx += 1;
                keep
            });
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}
