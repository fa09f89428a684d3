//! `Descriptor`: a serializable snapshot of a module tree's configuration,
//! and the pure functions ([`merge_config`], [`root_of`]) that operate on it.
//!
//! Only compiled when the `config` feature is enabled.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a configuration tree: an optional type reference (resolved
/// against a [`crate::registry::ModuleRegistry`]), a flat parameter map, and
/// any declared children, in document order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub modules: IndexMap<String, Descriptor>,
}

impl Descriptor {
    pub fn new(type_name: impl Into<String>) -> Self {
        Descriptor {
            type_name: Some(type_name.into()),
            config: Map::new(),
            modules: IndexMap::new(),
        }
    }

    /// Apply a `--set`-style dotted path override (e.g. `"workers.count"`)
    /// to this descriptor's `config`. The final path segment is the key that
    /// receives `value`; earlier segments are objects created as needed.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = segments.pop().expect("split always yields at least one segment");
        let mut cursor = &mut self.config;
        for segment in segments {
            cursor = cursor
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .expect("set_path segment collided with a non-object value");
        }
        cursor.insert(last.to_string(), value);
    }

    /// Return a copy of this descriptor with `override_node`'s `config`
    /// deep-merged over this one's (§4.5's `merge_config`, applied to a
    /// single node rather than the whole document).
    pub fn merged_with(&self, override_node: &Descriptor) -> Descriptor {
        let base = Value::Object(self.config.clone());
        let over = Value::Object(override_node.config.clone());
        let merged_config = match merge_config(&base, &over) {
            Value::Object(map) => map,
            _ => unreachable!("merging two objects always yields an object"),
        };
        Descriptor {
            type_name: override_node.type_name.clone().or_else(|| self.type_name.clone()),
            config: merged_config,
            modules: self.modules.clone(),
        }
    }
}

/// Deep-merge `override_value` over `base`, returning a new value and leaving
/// both inputs untouched. For each key present in `override_value`: if both
/// sides hold an object at that key, recurse; otherwise the override value
/// replaces the base value outright (arrays included — they are replaced,
/// never concatenated).
pub fn merge_config(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut result = base_map.clone();
            for (key, override_val) in override_map {
                match (result.get(key), override_val) {
                    (Some(base_val @ Value::Object(_)), Value::Object(_)) => {
                        result.insert(key.clone(), merge_config(base_val, override_val));
                    }
                    _ => {
                        result.insert(key.clone(), override_val.clone());
                    }
                }
            }
            Value::Object(result)
        }
        (_, override_value) => override_value.clone(),
    }
}

/// Pick the first top-level entry of a descriptor document as the root,
/// in document order (`IndexMap` preserves insertion/parse order).
pub fn root_of(document: &IndexMap<String, Descriptor>) -> Option<(&String, &Descriptor)> {
    document.iter().next()
}
