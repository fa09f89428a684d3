//! `ModuleRegistry`: resolves the string type references that appear in a
//! [`crate::descriptor::Descriptor`] to live factory functions.
//!
//! Rust has no runtime dynamic linking analogue for the `pkg.mod:Attr` string
//! form the reference driver contract describes (§6); both that form and the
//! bare entry-point-name form are represented uniformly as an opaque string
//! key into a table the embedding application populates ahead of time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{CoreError, CoreResult};
use crate::module::ModuleBehavior;

/// Builds a [`ModuleBehavior`] from a resolved descriptor node.
pub type ModuleFactory = Arc<dyn Fn(&Descriptor) -> CoreResult<Arc<dyn ModuleBehavior>> + Send + Sync>;

/// A table of named module factories, consulted during [`crate::initializer::initialize`]
/// to turn a descriptor's `type` string into a constructed [`ModuleBehavior`].
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`. Replaces any factory already
    /// registered under the same key.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F)
    where
        F: Fn(&Descriptor) -> CoreResult<Arc<dyn ModuleBehavior>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    /// Resolve `reference` against the registered factories and build a
    /// behavior from `descriptor`. Fails with [`CoreError::Resolve`] if no
    /// factory is registered under that key.
    pub fn resolve(&self, reference: &str, descriptor: &Descriptor) -> CoreResult<Arc<dyn ModuleBehavior>> {
        match self.factories.get(reference) {
            Some(factory) => factory(descriptor),
            None => Err(CoreError::Resolve {
                reference: reference.to_string(),
            }),
        }
    }
}
