//! Process-wide keyed store shared with sibling nodes.

#![allow(missing_docs)]

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Keyed store the host exposes to every node (global context).
pub trait SharedContext: Send + Sync {
    fn set(&self, key: &str, value: Value);
    fn get(&self, key: &str) -> Option<Value>;
}

/// Store key for the deployed live-state mapping of a controller.
#[must_use]
pub fn allstates_key(unique_id: &str) -> String {
    format!("{unique_id}_allstates")
}

#[derive(Debug, Default)]
pub struct MemoryContext {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SharedContext for MemoryContext {
    fn set(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }
}
