//! Mutually-exclusive execution of a nested run list.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    element::{Element, require_attribute},
    proxy::{ElementProxy, ProxyContext},
    sync,
};

#[derive(Debug, Default, Deserialize)]
struct FnLockProps {
    #[serde(default)]
    name: Option<String>,
}

/// `fn-lock: {name}` over `runs` — bodies sharing a name are serialized in
/// submission order, disposal included in the critical section.
pub struct FnLock {
    name: Option<String>,
    inner: Option<ElementProxy>,
}

impl FnLock {
    /// Builds the element; a bare string is the `name` shorthand.
    pub fn from_props(props: Value) -> Result<Box<dyn Element>> {
        let props = match props {
            Value::String(name) => FnLockProps { name: Some(name) },
            Value::Null => FnLockProps::default(),
            other => serde_json::from_value(other).context("invalid fn-lock properties")?,
        };
        Ok(Box::new(FnLock {
            name: props.name,
            inner: None,
        }))
    }
}

#[async_trait]
impl Element for FnLock {
    async fn execute(&mut self, _ctx: &mut ProxyContext, state: &Value) -> Result<Value> {
        let name = require_attribute("fn-lock", "name", self.name.clone())?;
        let mut inner = require_attribute("fn-lock", "runs", self.inner.take())?;

        let lock = sync::keyed_lock(&name);
        let _guard = lock.lock().await;
        let outcome = inner.execute(state).await;
        inner.dispose().await;
        outcome
    }

    async fn dispose(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.dispose().await;
        }
        Ok(())
    }

    fn attach_inner_runs(&mut self, inner: ElementProxy) -> Result<()> {
        self.inner = Some(inner);
        Ok(())
    }
}
