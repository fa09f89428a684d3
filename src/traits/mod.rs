//! Core traits shared across the runtime.

mod dispose;

pub use dispose::{AsyncManagedResource, ManagedResource};
