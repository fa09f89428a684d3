//! Realizes a descriptor tree into a live [`ModuleHandle`] tree, resolving
//! each node's `type` against a [`ModuleRegistry`].

use indexmap::IndexMap;

use crate::descriptor::Descriptor;
use crate::error::{CoreError, CoreResult};
use crate::module::{ModuleHandle, Timeouts};
use crate::registry::ModuleRegistry;

/// Attach `modules` as children of `root`, recursively, resolving each
/// node's `type` against `registry`. A no-op if `root` was already
/// initialized (idempotent, per §4.5).
pub async fn initialize(
    root: &ModuleHandle,
    modules: &IndexMap<String, Descriptor>,
    registry: &ModuleRegistry,
) -> CoreResult<()> {
    initialize_with_overrides(root, modules, IndexMap::new(), registry).await
}

/// Like [`initialize`], but first deep-merges `overrides` onto `modules`
/// node by node (§4.5's override-descriptor merge, applied per-node via
/// [`Descriptor::merged_with`]) before resolving and attaching children.
/// A node absent from `overrides` is attached unchanged.
pub async fn initialize_with_overrides(
    root: &ModuleHandle,
    modules: &IndexMap<String, Descriptor>,
    overrides: IndexMap<String, Descriptor>,
    registry: &ModuleRegistry,
) -> CoreResult<()> {
    if !root.mark_initialized() {
        return Ok(());
    }
    build_tree(root, modules, overrides, registry).await
}

fn build_tree<'a>(
    parent: &'a ModuleHandle,
    modules: &'a IndexMap<String, Descriptor>,
    overrides: IndexMap<String, Descriptor>,
    registry: &'a ModuleRegistry,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<()>> + Send + 'a>> {
    Box::pin(async move {
        for (name, descriptor) in modules {
            let override_node = overrides.get(name);
            let merged = override_node.map(|over| descriptor.merged_with(over));
            let effective = merged.as_ref().unwrap_or(descriptor);

            let type_ref = effective.type_name.as_deref().ok_or_else(|| CoreError::UnknownType {
                path: format!("{}.{}", parent.path(), name),
            })?;
            let behavior = registry.resolve(type_ref, effective)?;
            let child = parent.add_module(name.clone(), behavior, Timeouts::default()).await?;

            let child_overrides = override_node.map(|o| o.modules.clone()).unwrap_or_default();
            build_tree(&child, &descriptor.modules, child_overrides, registry).await?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::NoopBehavior;
    use std::sync::Arc;

    #[tokio::test]
    async fn initialize_attaches_declared_children() {
        let mut registry = ModuleRegistry::new();
        registry.register("group", |_d| Ok(Arc::new(NoopBehavior) as Arc<dyn crate::module::ModuleBehavior>));

        let mut modules = IndexMap::new();
        let mut child = Descriptor::new("group");
        child.modules.insert("grandchild".to_string(), Descriptor::new("group"));
        modules.insert("child".to_string(), child);

        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        initialize(&root, &modules, &registry).await.unwrap();

        root.prepare_and_start().await;
        assert!(root.exceptions().await.is_empty());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let mut registry = ModuleRegistry::new();
        registry.register("group", |_d| Ok(Arc::new(NoopBehavior) as Arc<dyn crate::module::ModuleBehavior>));
        let mut modules = IndexMap::new();
        modules.insert("child".to_string(), Descriptor::new("group"));

        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        initialize(&root, &modules, &registry).await.unwrap();
        initialize(&root, &modules, &registry).await.unwrap();
    }

    #[tokio::test]
    async fn override_descriptor_config_is_deep_merged_before_resolution() {
        use serde_json::json;
        use std::sync::Mutex;

        let seen_config = Arc::new(Mutex::new(None));
        let seen_config2 = seen_config.clone();
        let mut registry = ModuleRegistry::new();
        registry.register("worker", move |d| {
            *seen_config2.lock().unwrap() = Some(d.config.clone());
            Ok(Arc::new(NoopBehavior) as Arc<dyn crate::module::ModuleBehavior>)
        });

        let mut modules = IndexMap::new();
        let mut base = Descriptor::new("worker");
        base.config.insert("workers".to_string(), json!(1));
        base.config.insert("name".to_string(), json!("base"));
        modules.insert("child".to_string(), base);

        let mut overrides = IndexMap::new();
        let mut over = Descriptor::default();
        over.config.insert("workers".to_string(), json!(4));
        overrides.insert("child".to_string(), over);

        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        initialize_with_overrides(&root, &modules, overrides, &registry).await.unwrap();

        let config = seen_config.lock().unwrap().clone().unwrap();
        assert_eq!(config.get("workers"), Some(&json!(4)));
        assert_eq!(config.get("name"), Some(&json!("base")));
    }

    #[tokio::test]
    async fn unresolvable_type_reference_fails() {
        let registry = ModuleRegistry::new();
        let mut modules = IndexMap::new();
        modules.insert("child".to_string(), Descriptor::new("missing"));

        let root = ModuleHandle::new_root("root", Arc::new(NoopBehavior), Timeouts::default());
        let result = initialize(&root, &modules, &registry).await;
        assert!(matches!(result, Err(CoreError::Resolve { .. })));
    }
}
