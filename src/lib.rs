//! # modtree
//!
//! A modular application runtime: a tree of [`ModuleHandle`]s that execute a
//! strict prepare → start → stop lifecycle, exchange values through
//! type-indexed [`Context`]s, and broadcast events through [`Signal`]s.
//!
//! ## Quick start
//!
//! ```rust
//! use modtree::{ModuleBehavior, ModuleHandle, Timeouts};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl ModuleBehavior for Greeter {
//!     async fn start(&self, handle: &ModuleHandle) -> modtree::CoreResult<()> {
//!         handle.put("hello".to_string(), Default::default()).await?;
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let root = ModuleHandle::new_root("app", Arc::new(Greeter), Timeouts::default());
//! root.prepare_and_start().await;
//! let greeting = root.get::<String>(None).await.unwrap();
//! assert_eq!(*greeting, "hello");
//! root.stop().await;
//! # }
//! ```
//!
//! ## Layout
//!
//! - [`SharedValue`]/[`BorrowToken`]: the publish/borrow primitive.
//! - [`Context`]: a type-indexed registry of shared values with parent
//!   linkage, built on top of `SharedValue`.
//! - [`Signal`]/[`Receiver`]: fan-out broadcast independent of the module
//!   tree.
//! - [`ModuleHandle`]/[`ModuleBehavior`]: the lifecycle engine tying the above
//!   together into a supervised tree.
//! - [`descriptor`]/[`registry`]/[`initializer`] (behind the `config`
//!   feature): realize a module tree from a serialized configuration
//!   document instead of building it by hand.

mod cancellation;
mod context;
mod error;
mod internal;
mod key;
mod module;
mod observer;
mod shared_value;
mod signal;
mod traits;

#[cfg(feature = "config")]
pub mod descriptor;
#[cfg(feature = "config")]
pub mod initializer;
#[cfg(feature = "config")]
pub mod registry;

pub use cancellation::OnceEvent;
pub use context::Context;
pub use error::{CoreError, CoreResult};
pub use key::TypeKey;
pub use module::{ModuleBehavior, ModuleHandle, NoopBehavior, Timeouts};
pub use observer::{NoopObserver, RuntimeObserver, SharedObserver, TracingObserver};
pub use shared_value::{BorrowToken, PutOptions, SharedValue};
pub use signal::{Receiver, Signal, SignalHandle};
pub use traits::{AsyncManagedResource, ManagedResource};
