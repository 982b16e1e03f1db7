//! Per-scene variable storage.
//!
//! A scope has two sections. *Local* entries are visible only to lookups
//! against this exact scope. *Inheritable* entries are visible here and, by
//! copy, to every descendant scope created afterward; a descendant's write
//! mutates only its own copy.

use serde_json::{Map, Value};

/// Key/value store owned by one scene.
#[derive(Debug, Default, Clone)]
pub struct VariableScope {
    local: Map<String, Value>,
    inheritable: Map<String, Value>,
}

impl VariableScope {
    /// Looks up a top-level variable, local entries first.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.local.get(name).or_else(|| self.inheritable.get(name))
    }

    /// Sets a local entry, shadowing an inheritable entry of the same name.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.local.insert(name.into(), value);
    }

    /// Sets an inheritable entry on this scope's own copy.
    pub fn set_inheritable(&mut self, name: impl Into<String>, value: Value) {
        self.inheritable.insert(name.into(), value);
    }

    /// Point-in-time snapshot for a child scope: the inheritable section is
    /// copied, the local section starts empty.
    pub fn child_snapshot(&self) -> VariableScope {
        VariableScope {
            local: Map::new(),
            inheritable: self.inheritable.clone(),
        }
    }

    /// Merged view for expression evaluation, local entries overriding
    /// inheritable ones.
    pub fn merged(&self) -> Map<String, Value> {
        let mut merged = self.inheritable.clone();
        for (key, value) in &self.local {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Read access to the local section (root bootstrap inspects it).
    pub fn local(&self) -> &Map<String, Value> {
        &self.local
    }
}
