//! Named data contexts
//!
//! Every step executes against a store of named contexts. The store is
//! shadowed-immutable: spawning a child clones the name→context map and adds
//! one binding, leaving the parent store untouched, so sibling iterations
//! never see each other's bindings. The data payloads themselves are shared
//! `Arc` cells — a merge into a context is visible to every store that holds
//! it, which is what lets `mergeWithContext` update an ancestor from deep
//! inside the step tree.
//!
//! Invariant: a context's depth is its parent's depth plus one; the root
//! context has depth 0 and an empty parent key.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Name of the root context
pub const ROOT_KEY: &str = "root";

/// A named, mutable data slot with a parent link and depth
#[derive(Debug)]
pub struct Context {
    key: String,
    /// Parent context key; empty for the root
    parent: String,
    depth: usize,
    data: Mutex<Value>,
}

impl Context {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Snapshot of the current data
    pub fn data(&self) -> Value {
        self.data.lock().clone()
    }

    /// Replace the data payload in place
    pub fn set_data(&self, value: Value) {
        *self.data.lock() = value;
    }
}

/// Mapping from context name to context, cloned on child creation
#[derive(Clone, Default)]
pub struct ContextStore {
    map: HashMap<String, Arc<Context>>,
}

impl ContextStore {
    /// Create a store holding only the root context
    pub fn with_root(data: Value) -> Self {
        let root = Arc::new(Context {
            key: ROOT_KEY.to_string(),
            parent: String::new(),
            depth: 0,
            data: Mutex::new(data),
        });
        let mut map = HashMap::new();
        map.insert(ROOT_KEY.to_string(), root);
        Self { map }
    }

    /// New store with an additional binding shadowing `name`
    pub fn child_with(&self, name: &str, parent: &Arc<Context>, value: Value) -> Self {
        let child = Arc::new(Context {
            key: name.to_string(),
            parent: parent.key.clone(),
            depth: parent.depth + 1,
            data: Mutex::new(value),
        });
        let mut map = self.map.clone();
        map.insert(name.to_string(), child);
        Self { map }
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<Context>> {
        self.map.get(name)
    }

    /// Template-context snapshot: root mapping keys are promoted to the top
    /// level, every other context is exposed under its name. A sequence (or
    /// scalar) root contributes nothing at the top level.
    pub fn template_context(&self) -> Value {
        let mut out = Map::new();

        if let Some(root) = self.map.get(ROOT_KEY) {
            if let Value::Object(fields) = root.data() {
                for (k, v) in fields {
                    out.insert(k, v);
                }
            }
        }

        for (name, context) in &self.map {
            if name == ROOT_KEY {
                continue;
            }
            out.insert(name.clone(), context.data());
        }

        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_has_depth_zero_and_no_parent() {
        let store = ContextStore::with_root(json!([]));
        let root = store.lookup(ROOT_KEY).unwrap();
        assert_eq!(root.depth(), 0);
        assert_eq!(root.parent(), "");
        assert_eq!(root.data(), json!([]));
    }

    #[test]
    fn child_depth_is_parent_plus_one() {
        let store = ContextStore::with_root(json!({}));
        let root = Arc::clone(store.lookup(ROOT_KEY).unwrap());
        let store = store.child_with("facility", &root, json!({"id": 1}));
        let facility = Arc::clone(store.lookup("facility").unwrap());
        assert_eq!(facility.depth(), 1);
        assert_eq!(facility.parent(), ROOT_KEY);

        let store = store.child_with("sub", &facility, json!({}));
        assert_eq!(store.lookup("sub").unwrap().depth(), 2);
    }

    #[test]
    fn child_creation_does_not_mutate_parent_store() {
        let store = ContextStore::with_root(json!({}));
        let root = Arc::clone(store.lookup(ROOT_KEY).unwrap());
        let child_store = store.child_with("item", &root, json!(1));

        assert!(store.lookup("item").is_none());
        assert!(child_store.lookup("item").is_some());
    }

    #[test]
    fn shadowing_replaces_visible_binding() {
        let store = ContextStore::with_root(json!({}));
        let root = Arc::clone(store.lookup(ROOT_KEY).unwrap());
        let outer = store.child_with("item", &root, json!("outer"));
        let outer_item = Arc::clone(outer.lookup("item").unwrap());
        let inner = outer.child_with("item", &outer_item, json!("inner"));

        assert_eq!(inner.lookup("item").unwrap().data(), json!("inner"));
        assert_eq!(outer.lookup("item").unwrap().data(), json!("outer"));
    }

    #[test]
    fn mutation_is_visible_through_older_stores() {
        let store = ContextStore::with_root(json!({}));
        let root = Arc::clone(store.lookup(ROOT_KEY).unwrap());
        let child_store = store.child_with("item", &root, json!(1));

        // Mutating through the child store's binding is seen by the parent
        // store's root handle too, since cells are shared.
        child_store
            .lookup(ROOT_KEY)
            .unwrap()
            .set_data(json!({"merged": true}));
        assert_eq!(store.lookup(ROOT_KEY).unwrap().data(), json!({"merged": true}));
    }

    #[test]
    fn template_context_promotes_root_mapping() {
        let store = ContextStore::with_root(json!({"base": "https://ex", "page": 1}));
        let root = Arc::clone(store.lookup(ROOT_KEY).unwrap());
        let store = store.child_with("facility", &root, json!({"id": 9}));

        let ctx = store.template_context();
        assert_eq!(ctx["base"], json!("https://ex"));
        assert_eq!(ctx["page"], json!(1));
        assert_eq!(ctx["facility"], json!({"id": 9}));
        assert!(ctx.get(ROOT_KEY).is_none());
    }

    #[test]
    fn template_context_ignores_sequence_root() {
        let store = ContextStore::with_root(json!([1, 2, 3]));
        let ctx = store.template_context();
        assert_eq!(ctx, json!({}));
    }
}
