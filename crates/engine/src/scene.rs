//! Execution scopes.
//!
//! A [`Scene`] owns the variable scope for one nesting level and mirrors the
//! group nesting: every group that introduces a new scope gets a child scene
//! whose inheritable variables are a point-in-time copy of its parent's. The
//! back-link to the root is non-owning, so a scene never keeps the root
//! alive.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::{
    resolve::{self, ScopeContext},
    root::RootScene,
    scope::VariableScope,
};

/// One variable-resolution context in the scene tree.
#[derive(Debug)]
pub struct Scene {
    root: Weak<RootScene>,
    scope: RwLock<VariableScope>,
    dir: Option<PathBuf>,
}

impl Scene {
    pub(crate) fn new(root: Weak<RootScene>, scope: VariableScope, dir: Option<PathBuf>) -> Arc<Scene> {
        Arc::new(Scene {
            root,
            scope: RwLock::new(scope),
            dir,
        })
    }

    /// Creates a child scene: inheritable variables copied now, local
    /// variables fresh, same working directory.
    pub fn child(self: &Arc<Self>) -> Arc<Scene> {
        self.child_in_dir(self.dir.clone())
    }

    /// Creates a child scene rooted at a different directory (used when a
    /// nested playbook file lives elsewhere).
    pub fn child_in_dir(self: &Arc<Self>, dir: Option<PathBuf>) -> Arc<Scene> {
        let snapshot = self.read_scope().child_snapshot();
        Scene::new(self.root.clone(), snapshot, dir)
    }

    /// Upgrades the non-owning back-link to the root scene.
    pub fn root(&self) -> Result<Arc<RootScene>> {
        self.root.upgrade().context("root scene was dropped while a scene was still executing")
    }

    /// Directory used to resolve relative include/scene paths.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Resolves a possibly-relative path against this scene's directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        if candidate.is_absolute() {
            return candidate;
        }
        match &self.dir {
            Some(dir) => dir.join(candidate),
            None => candidate,
        }
    }

    /// Looks up a top-level variable in this exact scope.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.read_scope().get(name).cloned()
    }

    /// Declares a local variable on this scope.
    pub fn set_local(&self, name: impl Into<String>, value: Value) {
        self.write_scope().set_local(name, value);
    }

    /// Declares an inheritable variable on this scope's own copy.
    pub fn set_inheritable(&self, name: impl Into<String>, value: Value) {
        self.write_scope().set_inheritable(name, value);
    }

    /// Applies a mapping of declarations to the chosen section.
    pub fn apply_vars(&self, mapping: &Value, inheritable: bool) {
        let Value::Object(entries) = mapping else {
            return;
        };
        let mut scope = self.write_scope();
        for (name, value) in entries {
            if inheritable {
                scope.set_inheritable(name.clone(), value.clone());
            } else {
                scope.set_local(name.clone(), value.clone());
            }
        }
    }

    /// Builds the expression-evaluation snapshot for this scope.
    pub fn context(&self, loop_key: Option<Value>, loop_value: Option<Value>, parent: &Value) -> ScopeContext {
        let env = self.root().map(|root| root.environment().clone()).unwrap_or_default();
        ScopeContext {
            vars: self.read_scope().merged(),
            env,
            loop_key,
            loop_value,
            parent: parent.clone(),
        }
    }

    /// Interpolates `${{ ... }}` templates in `value` against this scope.
    pub fn render(&self, value: &Value, context: &ScopeContext) -> Value {
        resolve::interpolate_value(value, context)
    }

    pub(crate) fn read_scope(&self) -> RwLockReadGuard<'_, VariableScope> {
        self.scope.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write_scope(&self) -> RwLockWriteGuard<'_, VariableScope> {
        self.scope.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
