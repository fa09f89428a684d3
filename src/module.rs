//! `Module`: the lifecycle engine. A tree of modules executes three phases in
//! strict order — prepare, start, stop — fanning out to the whole subtree
//! concurrently at each phase and aggregating failures into a shared,
//! root-wide exception list instead of letting them escape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::cancellation::OnceEvent;
use crate::context::{Context, ErasedSharedValue};
use crate::error::{CoreError, CoreResult};
use crate::key::TypeKey;
use crate::observer::{NoopObserver, SharedObserver};
use crate::shared_value::{BorrowToken, PutOptions, SharedValue};

/// Per-phase timeouts for a module. Defaults match the reference runtime: one
/// second per phase.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub prepare: Duration,
    pub start: Duration,
    pub stop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            prepare: Duration::from_secs(1),
            start: Duration::from_secs(1),
            stop: Duration::from_secs(1),
        }
    }
}

/// User-implemented lifecycle hooks. All three default to doing nothing and
/// completing immediately (the phase's implicit `done()`).
///
/// A hook that needs a phase to complete while background work keeps running
/// should spawn that work (`tokio::spawn`) and call [`ModuleHandle::done`]
/// before returning, rather than awaiting the work itself.
#[async_trait::async_trait]
pub trait ModuleBehavior: Send + Sync {
    async fn prepare(&self, _handle: &ModuleHandle) -> CoreResult<()> {
        Ok(())
    }

    async fn start(&self, _handle: &ModuleHandle) -> CoreResult<()> {
        Ok(())
    }

    async fn stop(&self, _handle: &ModuleHandle) -> CoreResult<()> {
        Ok(())
    }
}

/// A no-op behavior, useful for organizational modules that only group
/// children.
pub struct NoopBehavior;

#[async_trait::async_trait]
impl ModuleBehavior for NoopBehavior {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Idle,
    Preparing,
    Starting,
    Stopping,
    Stopped,
}

trait ErasedBorrow: Send + Sync {
    fn release(&self);
}

impl<T: Send + Sync + 'static> ErasedBorrow for BorrowToken<T> {
    fn release(&self) {
        BorrowToken::release(self)
    }
}

struct NodeInner {
    name: String,
    path: String,
    behavior: Arc<dyn ModuleBehavior>,
    context: Context,
    parent: Option<ModuleHandle>,
    children: Mutex<Vec<ModuleHandle>>,
    timeouts: Timeouts,
    prepared: OnceEvent,
    started: OnceEvent,
    stopped: OnceEvent,
    exit: Arc<OnceEvent>,
    exceptions: Arc<Mutex<Vec<CoreError>>>,
    phase: Mutex<Phase>,
    finishing: AtomicBool,
    initialized: AtomicBool,
    published: Mutex<HashMap<TypeKey, Arc<dyn ErasedSharedValue>>>,
    acquired: Mutex<HashMap<TypeKey, Box<dyn ErasedBorrow>>>,
    observer: SharedObserver,
}

/// A handle to one node of a module tree. Cheap to clone (an `Arc` handle,
/// not a copy of the node).
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<NodeInner>,
}

impl ModuleHandle {
    /// Build a root module. There is exactly one root per tree; its `exit`
    /// event and `exceptions` list are shared by every descendant.
    pub fn new_root(name: impl Into<String>, behavior: Arc<dyn ModuleBehavior>, timeouts: Timeouts) -> Self {
        Self::new_root_with_observer(name, behavior, timeouts, Arc::new(NoopObserver))
    }

    pub fn new_root_with_observer(
        name: impl Into<String>,
        behavior: Arc<dyn ModuleBehavior>,
        timeouts: Timeouts,
        observer: SharedObserver,
    ) -> Self {
        let name = name.into();
        let context = Context::with_observer(name.clone(), observer.clone());
        ModuleHandle {
            inner: Arc::new(NodeInner {
                path: name.clone(),
                name,
                behavior,
                context,
                parent: None,
                children: Mutex::new(Vec::new()),
                timeouts,
                prepared: OnceEvent::new(),
                started: OnceEvent::new(),
                stopped: OnceEvent::new(),
                exit: Arc::new(OnceEvent::new()),
                exceptions: Arc::new(Mutex::new(Vec::new())),
                phase: Mutex::new(Phase::Idle),
                finishing: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                published: Mutex::new(HashMap::new()),
                acquired: Mutex::new(HashMap::new()),
                observer,
            }),
        }
    }

    /// Attach a new child under this module. Fails with
    /// [`CoreError::DuplicateName`] if a child with this name already exists.
    pub async fn add_module(
        &self,
        name: impl Into<String>,
        behavior: Arc<dyn ModuleBehavior>,
        timeouts: Timeouts,
    ) -> CoreResult<ModuleHandle> {
        let name = name.into();
        let mut children = self.inner.children.lock().await;
        if children.iter().any(|c| c.inner.name == name) {
            return Err(CoreError::DuplicateName {
                parent: self.inner.path.clone(),
                name,
            });
        }
        let path = format!("{}.{}", self.inner.path, name);
        let context = self.inner.context.child(path.clone());
        let child = ModuleHandle {
            inner: Arc::new(NodeInner {
                path,
                name,
                behavior,
                context,
                parent: Some(self.clone()),
                children: Mutex::new(Vec::new()),
                timeouts,
                prepared: OnceEvent::new(),
                started: OnceEvent::new(),
                stopped: OnceEvent::new(),
                exit: self.inner.exit.clone(),
                exceptions: self.inner.exceptions.clone(),
                phase: Mutex::new(Phase::Idle),
                finishing: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                published: Mutex::new(HashMap::new()),
                acquired: Mutex::new(HashMap::new()),
                observer: self.inner.observer.clone(),
            }),
        };
        children.push(child.clone());
        Ok(child)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Mark this node as initialized, returning `true` the first time this is
    /// called and `false` on every later call. Backs the idempotence of
    /// [`crate::initializer::initialize`].
    pub fn mark_initialized(&self) -> bool {
        !self.inner.initialized.swap(true, Ordering::AcqRel)
    }

    /// Exceptions captured anywhere in the tree rooted at this module.
    /// Non-empty only after `exit` has fired.
    pub async fn exceptions(&self) -> Vec<String> {
        self.inner
            .exceptions
            .lock()
            .await
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    pub fn exit_requested(&self) -> bool {
        self.inner.exit.is_set()
    }

    /// Set the tree-wide `exit` event, requesting every module expedite stop.
    pub fn request_exit(&self) {
        if !self.inner.exit.is_set() {
            self.inner.exit.set();
            if !self.inner.observer.is_noop() {
                self.inner.observer.exit_signalled(&self.inner.path);
            }
        }
    }

    pub async fn wait_prepared(&self) {
        self.inner.prepared.wait().await;
    }

    pub async fn wait_started(&self) {
        self.inner.started.wait().await;
    }

    pub async fn wait_stopped(&self) {
        self.inner.stopped.wait().await;
    }

    /// Signal that this module's current phase may be considered complete.
    /// Implicit at the end of `prepare`/`start`/`stop`; callers that spawn
    /// background work call this explicitly and return without awaiting it.
    pub async fn done(&self) {
        let phase = *self.inner.phase.lock().await;
        match phase {
            Phase::Preparing => self.inner.prepared.set(),
            Phase::Starting => self.inner.started.set(),
            Phase::Stopping => self.begin_finish().await,
            Phase::Idle | Phase::Stopped => {}
        }
    }

    /// Publish a value into this module's own context and its parent's
    /// (so siblings can find it), recording it for teardown at stop.
    pub async fn put<T: Send + Sync + 'static>(
        &self,
        value: T,
        options: PutOptions<T>,
    ) -> CoreResult<SharedValue<T>> {
        let shared = SharedValue::new(value, options);
        self.put_shared(shared.clone()).await?;
        Ok(shared)
    }

    async fn put_shared<T: Send + Sync + 'static>(&self, shared: SharedValue<T>) -> CoreResult<()> {
        self.inner.context.put_shared(shared.clone()).await?;
        if let Some(parent) = &self.inner.parent {
            // A duplicate here means a sibling already published this type;
            // our own context keeps the value regardless.
            let _ = parent.inner.context.put_shared(shared.clone()).await;
        }
        self.inner
            .published
            .lock()
            .await
            .insert(TypeKey::of::<T>(), Arc::new(shared));
        Ok(())
    }

    /// Borrow a value by type, searching this module's context and its
    /// ancestors. The acquisition is tracked and released during `stop`
    /// unless dropped earlier with [`ModuleHandle::drop_value`].
    pub async fn get<T: Send + Sync + 'static>(&self, timeout: Option<Duration>) -> CoreResult<Arc<T>> {
        let token = self.inner.context.get::<T>(timeout).await?;
        let value = token.value()?;
        self.inner
            .acquired
            .lock()
            .await
            .insert(TypeKey::of::<T>(), Box::new(token));
        Ok(value)
    }

    /// Release one acquired borrow early, by type.
    pub async fn drop_value<T: 'static>(&self) {
        self.inner.acquired.lock().await.remove(&TypeKey::of::<T>());
    }

    /// Release every acquired borrow.
    pub async fn drop_all(&self) {
        self.inner.acquired.lock().await.clear();
    }

    /// Wait until the published value of type `T` has no live borrowers.
    pub async fn freed<T: Send + Sync + 'static>(&self, timeout: Option<Duration>) -> CoreResult<()> {
        let published = self.inner.published.lock().await;
        match published.get(&TypeKey::of::<T>()) {
            Some(value) => value.freed_erased(timeout).await,
            None => Ok(()),
        }
    }

    /// Wait until every value this module published has no live borrowers.
    pub async fn all_freed(&self, timeout: Option<Duration>) -> CoreResult<()> {
        let values: Vec<_> = self.inner.published.lock().await.values().cloned().collect();
        match timeout {
            Some(d) => tokio::time::timeout(d, async {
                for value in values {
                    value.freed_erased(None).await?;
                }
                Ok::<_, CoreError>(())
            })
            .await
            .map_err(|_| CoreError::Timeout {
                what: format!("all_freed({})", self.inner.path),
            })?,
            None => {
                for value in values {
                    value.freed_erased(None).await?;
                }
                Ok(())
            }
        }
    }

    pub async fn add_teardown_callback<F>(&self, f: F)
    where
        F: FnOnce(Option<&CoreError>) + Send + 'static,
    {
        self.inner.context.add_teardown_callback(f).await;
    }

    pub async fn add_teardown_callback_async<F, Fut>(&self, f: F)
    where
        F: FnOnce(Option<&CoreError>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.inner.context.add_teardown_callback_async(f).await;
    }

    async fn capture_error(&self, error: CoreError) {
        if !self.inner.observer.is_noop() {
            self.inner.observer.exception_captured(&self.inner.path, &error);
        }
        self.inner.exceptions.lock().await.push(error);
        self.request_exit();
    }

    async fn children_snapshot(&self) -> Vec<ModuleHandle> {
        self.inner.children.lock().await.clone()
    }

    /// Run prepare, then (if nothing failed) start, leaving the tree
    /// `started` and waiting. Call [`ModuleHandle::stop`] to tear down.
    pub async fn prepare_and_start(&self) {
        self.run_phase(Phase::Preparing).await;
        if self.inner.exceptions.lock().await.is_empty() {
            self.run_phase(Phase::Starting).await;
        }
    }

    /// Run the stop phase. Safe to call even if prepare/start never ran or
    /// failed partway; stop always runs to completion (or exit cuts it short).
    pub async fn stop(&self) {
        self.run_phase(Phase::Stopping).await;
    }

    fn run_phase<'a>(&'a self, phase: Phase) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            *self.inner.phase.lock().await = phase;
            let phase_name = phase_name(phase);
            if !self.inner.observer.is_noop() {
                self.inner.observer.module_phase_entered(&self.inner.path, phase_name);
            }

            let timeout = match phase {
                Phase::Preparing => self.inner.timeouts.prepare,
                Phase::Starting => self.inner.timeouts.start,
                Phase::Stopping => self.inner.timeouts.stop,
                Phase::Idle | Phase::Stopped => Duration::from_secs(0),
            };

            let children = self.children_snapshot().await;
            let run_all = async {
                let mut set = JoinSet::new();
                for child in children {
                    set.spawn(async move {
                        child.run_phase(phase).await;
                    });
                }
                self.run_own_phase_body(phase).await;
                while set.join_next().await.is_some() {}
            };

            if tokio::time::timeout(timeout, run_all).await.is_err() {
                self.collect_timeouts(phase).await;
            }

            if !self.inner.observer.is_noop() {
                self.inner.observer.module_phase_completed(&self.inner.path, phase_name);
            }
        })
    }

    async fn run_own_phase_body(&self, phase: Phase) {
        match phase {
            Phase::Preparing => {
                if let Err(err) = self.inner.behavior.prepare(self).await {
                    self.capture_error(err).await;
                }
                self.inner.prepared.set();
            }
            Phase::Starting => {
                if let Err(err) = self.inner.behavior.start(self).await {
                    self.capture_error(err).await;
                }
                self.inner.started.set();
            }
            Phase::Stopping => {
                if let Err(err) = self.inner.behavior.stop(self).await {
                    self.capture_error(err).await;
                }
                if !self.inner.finishing.swap(true, Ordering::AcqRel) {
                    self.finish_stop().await;
                }
            }
            Phase::Idle | Phase::Stopped => {}
        }
    }

    async fn begin_finish(&self) {
        if !self.inner.finishing.swap(true, Ordering::AcqRel) {
            self.finish_stop().await;
        }
    }

    /// Drop acquired tokens, then tear down this module's own context,
    /// racing against the tree-wide `exit` event so a misbehaving teardown
    /// cannot block the whole tree from shutting down.
    async fn finish_stop(&self) {
        self.drop_all().await;
        let last_error = self.inner.exceptions.lock().await.last().cloned();
        let context = self.inner.context.clone();
        let error_ref = last_error.as_ref();
        let teardown = context.aclose(None, error_ref);
        let exit_wait = self.inner.exit.wait();
        tokio::select! {
            _ = teardown => {}
            _ = exit_wait => {}
        }
        self.inner.stopped.set();
        *self.inner.phase.lock().await = Phase::Stopped;
    }

    async fn collect_timeouts(&self, phase: Phase) {
        let children = self.children_snapshot().await;
        for child in children {
            Box::pin(child.collect_timeouts(phase)).await;
        }
        let event_set = match phase {
            Phase::Preparing => self.inner.prepared.is_set(),
            Phase::Starting => self.inner.started.is_set(),
            Phase::Stopping => self.inner.stopped.is_set(),
            Phase::Idle | Phase::Stopped => true,
        };
        if !event_set {
            self.capture_error(CoreError::Timeout {
                what: format!("{}: {}", phase_gerund(phase), self.inner.path),
            })
            .await;
        }
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idle",
        Phase::Preparing => "prepare",
        Phase::Starting => "start",
        Phase::Stopping => "stop",
        Phase::Stopped => "stopped",
    }
}

/// Gerund form used in timeout messages, matching `"timed out while
/// preparing: <path>"`-style wording.
fn phase_gerund(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "idling",
        Phase::Preparing => "preparing",
        Phase::Starting => "starting",
        Phase::Stopping => "stopping",
        Phase::Stopped => "stopped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct RecordingBehavior {
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    #[async_trait::async_trait]
    impl ModuleBehavior for RecordingBehavior {
        async fn prepare(&self, _handle: &ModuleHandle) -> CoreResult<()> {
            self.order.lock().await.push(self.label);
            Ok(())
        }
    }

    #[tokio::test]
    async fn prepare_and_start_complete_for_a_single_module() {
        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        root.prepare_and_start().await;
        assert!(root.wait_prepared_is_done().await);
        assert!(root.exceptions().await.is_empty());
    }

    impl ModuleHandle {
        async fn wait_prepared_is_done(&self) -> bool {
            self.inner.prepared.is_set()
        }
    }

    #[tokio::test]
    async fn children_prepare_concurrently_with_parent() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let root = ModuleHandle::new_root(
            "root",
            Arc::new(RecordingBehavior {
                order: order.clone(),
                label: "root",
            }),
            Timeouts::default(),
        );
        root.add_module(
            "child",
            Arc::new(RecordingBehavior {
                order: order.clone(),
                label: "child",
            }),
            Timeouts::default(),
        )
        .await
        .unwrap();
        root.prepare_and_start().await;
        let seen = order.lock().await.clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&"root"));
        assert!(seen.contains(&"child"));
    }

    #[tokio::test]
    async fn duplicate_child_name_fails() {
        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        root.add_module("child", Arc::new(NoopBehavior), Timeouts::default())
            .await
            .unwrap();
        let err = root
            .add_module("child", Arc::new(NoopBehavior), Timeouts::default())
            .await;
        assert!(matches!(err, Err(CoreError::DuplicateName { .. })));
    }

    struct FailingPrepare;

    #[async_trait::async_trait]
    impl ModuleBehavior for FailingPrepare {
        async fn prepare(&self, _handle: &ModuleHandle) -> CoreResult<()> {
            Err(CoreError::InstantiationFailed {
                path: "root".into(),
                message: "boom".into(),
            })
        }
    }

    #[tokio::test]
    async fn prepare_failure_sets_exit_and_is_captured() {
        let root = ModuleHandle::new_root("root", Arc::new(FailingPrepare), Timeouts::default());
        root.prepare_and_start().await;
        assert!(root.exit_requested());
        assert_eq!(root.exceptions().await.len(), 1);
    }

    #[tokio::test]
    async fn stop_always_runs_and_tears_down_published_values() {
        let torn_down = Arc::new(AtomicU32::new(0));
        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        let torn_down2 = torn_down.clone();
        root.put(
            1u32,
            PutOptions::default().with_teardown_callback(move |_| {
                torn_down2.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        )
        .await
        .unwrap();
        root.prepare_and_start().await;
        root.stop().await;
        assert_eq!(torn_down.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn put_is_visible_to_sibling_via_parent_context() {
        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        let a = root
            .add_module("a", Arc::new(NoopBehavior), Timeouts::default())
            .await
            .unwrap();
        let b = root
            .add_module("b", Arc::new(NoopBehavior), Timeouts::default())
            .await
            .unwrap();
        a.put(7u32, PutOptions::default()).await.unwrap();
        let value = b.get::<u32>(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(*value, 7);
    }
}
