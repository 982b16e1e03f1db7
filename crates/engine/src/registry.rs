//! Tag resolution.
//!
//! A tag name is resolved to an element constructor through an explicit
//! registry; there is no reflective probing. The built-in catalogue covers
//! the shipped leaf operations and concurrency wrappers; embedders register
//! additional tags on top.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use anyhow::Result;
use runbook_types::RunbookError;
use serde_json::Value;

use crate::{
    element::{Element, ElementFactory},
    elements,
    scene::Scene,
};

/// Maps a tag name to a constructible element type.
pub trait TagResolver: Send + Sync {
    /// Resolves `tag_name` for a construction happening in `scene`.
    fn resolve(&self, tag_name: &str, scene: &Scene) -> Result<ElementFactory>;
}

/// Keyed registry of element constructors.
pub struct TagRegistry {
    factories: RwLock<HashMap<String, ElementFactory>>,
}

impl TagRegistry {
    /// Empty registry.
    pub fn new() -> Arc<TagRegistry> {
        Arc::new(TagRegistry {
            factories: RwLock::new(HashMap::new()),
        })
    }

    /// Registry preloaded with the built-in catalogue.
    pub fn builtin() -> Arc<TagRegistry> {
        let registry = TagRegistry::new();
        registry.register("base", |_| Ok(Box::new(elements::Base)));
        registry.register("echo", |props| Ok(Box::new(elements::Echo::new(props))));
        registry.register("vars", |props| Ok(Box::new(elements::Vars::new(props))));
        registry.register("sleep", |props| Ok(Box::new(elements::Sleep::new(props))));
        registry.register("exec", |props| Ok(Box::new(elements::Exec::new(props))));
        registry.register("scene", |props| elements::SceneTag::from_props(props));
        registry.register("fn-lock", |props| elements::FnLock::from_props(props));
        registry.register("fn-debounce", |props| elements::FnDebounce::from_props(props));
        registry.register("fn-throttle", |props| elements::FnThrottle::from_props(props));
        registry
    }

    /// Installs a constructor for `tag_name`, replacing any existing one.
    pub fn register<F>(&self, tag_name: &str, factory: F)
    where
        F: Fn(Value) -> Result<Box<dyn Element>> + Send + Sync + 'static,
    {
        self.write().insert(tag_name.to_string(), Arc::new(factory));
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ElementFactory>> {
        self.factories.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ElementFactory>> {
        self.factories.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TagResolver for TagRegistry {
    fn resolve(&self, tag_name: &str, _scene: &Scene) -> Result<ElementFactory> {
        self.read()
            .get(tag_name)
            .cloned()
            .ok_or_else(|| RunbookError::UnknownTag(tag_name.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::{RootScene, RootSceneOptions};

    #[test]
    fn unknown_tags_resolve_to_the_taxonomy_error() {
        let root = RootScene::from_content("runs: []", RootSceneOptions::default()).expect("root");
        let registry = TagRegistry::builtin();
        let error = registry.resolve("no-such-tag", root.scene()).err().expect("unknown tag");
        assert!(matches!(
            error.downcast_ref::<RunbookError>(),
            Some(RunbookError::UnknownTag(tag)) if tag == "no-such-tag"
        ));
    }

    #[test]
    fn registration_overrides_and_extends_the_catalogue() {
        let root = RootScene::from_content("runs: []", RootSceneOptions::default()).expect("root");
        let registry = TagRegistry::builtin();
        registry.register("custom", |_| Ok(Box::new(elements::Base)));
        assert!(registry.resolve("custom", root.scene()).is_ok());
        assert!(registry.resolve("echo", root.scene()).is_ok());
    }
}
