//! The scoped-resource protocol backing `SharedValue`'s `manage` flag.
//!
//! `manage` asks a `SharedValue` to treat its inner value as a resource
//! descriptor rather than a plain value: `open()` acquires the real value once
//! by calling `setup()`, and `close()` releases it by calling `teardown()`,
//! passing along whatever error the owning scope closed with (if any). Both a
//! synchronous and an asynchronous flavor exist; a `SharedValue` is handed one
//! or the other explicitly at construction time rather than probing a value
//! for which traits it happens to implement.

/// Synchronous half of the scoped-resource protocol.
///
/// # Examples
///
/// ```
/// use modtree::ManagedResource;
///
/// struct TempDir;
///
/// impl ManagedResource for TempDir {
///     type Output = String;
///
///     fn setup(&self) -> String {
///         "/tmp/example".to_string()
///     }
///
///     fn teardown(&self, _output: String, _error: Option<&modtree::CoreError>) {
///         // remove the directory
///     }
/// }
/// ```
pub trait ManagedResource: Send + Sync + 'static {
    /// The value a borrower actually receives once the resource is open.
    type Output: Send + Sync + 'static;

    /// Acquire the resource. Called exactly once, by `SharedValue::open`.
    fn setup(&self) -> Self::Output;

    /// Release the resource. Called exactly once, by `SharedValue::close`.
    fn teardown(&self, output: Self::Output, error: Option<&crate::CoreError>);
}

/// Asynchronous half of the scoped-resource protocol. A `SharedValue` is
/// built with either this or [`ManagedResource`] via
/// `SharedValue::new_managed_async`/`new_managed_sync`; nothing probes a
/// value for which one it implements.
#[async_trait::async_trait]
pub trait AsyncManagedResource: Send + Sync + 'static {
    /// The value a borrower actually receives once the resource is open.
    type Output: Send + Sync + 'static;

    /// Acquire the resource. Called exactly once, by `SharedValue::open`.
    async fn setup(&self) -> Self::Output;

    /// Release the resource. Called exactly once, by `SharedValue::close`.
    async fn teardown(&self, output: Self::Output, error: Option<&crate::CoreError>);
}
