//! Debounced execution of a nested run list.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    element::{Element, require_attribute},
    proxy::{ElementProxy, ProxyContext},
    sync::{self, DebounceOptions, Debouncer, WrapperBody},
    time::parse_duration,
};

#[derive(Debug, Default, Deserialize)]
struct FnDebounceProps {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    wait: Option<Value>,
    #[serde(default)]
    leading: Option<bool>,
    #[serde(default)]
    trailing: Option<bool>,
    #[serde(default)]
    max_wait: Option<Value>,
}

/// `fn-debounce: {name, wait, ...}` over `runs` — bursts of triggers within
/// `wait` collapse into one body invocation. Steps sharing a name attach to
/// one shared debouncer, so the first caller's body is the one that runs.
pub struct FnDebounce {
    props: FnDebounceProps,
    inner: Option<Arc<tokio::sync::Mutex<ElementProxy>>>,
}

impl FnDebounce {
    /// Builds the element from its property mapping.
    pub fn from_props(props: Value) -> Result<Box<dyn Element>> {
        let props = match props {
            Value::Null => FnDebounceProps::default(),
            other => serde_json::from_value(other).context("invalid fn-debounce properties")?,
        };
        Ok(Box::new(FnDebounce { props, inner: None }))
    }
}

#[async_trait]
impl Element for FnDebounce {
    async fn execute(&mut self, _ctx: &mut ProxyContext, state: &Value) -> Result<Value> {
        let name = require_attribute("fn-debounce", "name", self.props.name.clone())?;
        let wait = parse_duration(&require_attribute("fn-debounce", "wait", self.props.wait.clone())?)?;
        let max_wait = self.props.max_wait.as_ref().map(parse_duration).transpose()?;
        let inner = require_attribute("fn-debounce", "runs", self.inner.clone())?;

        let options = DebounceOptions {
            leading: self.props.leading.unwrap_or(false),
            trailing: self.props.trailing.unwrap_or(true),
            max_wait,
        };
        let debouncer = sync::obtain_debouncer(&name, || Debouncer::new(wait, options, shared_body(&name, inner)));
        debouncer.call(state.clone());
        Ok(Value::Null)
    }

    // The shared debouncer may still fire the body later, so the proxy owns
    // nothing to release here; teardown goes through the registry.
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    fn attach_inner_runs(&mut self, inner: ElementProxy) -> Result<()> {
        self.inner = Some(Arc::new(tokio::sync::Mutex::new(inner)));
        Ok(())
    }

    fn process_exit_hook(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        let name = self.props.name.clone()?;
        Some(Box::new(move || {
            sync::remove_debouncer(&name);
        }))
    }
}

pub(crate) fn shared_body(name: &str, inner: Arc<tokio::sync::Mutex<ElementProxy>>) -> WrapperBody {
    let name = name.to_string();
    Arc::new(move |state: Value| {
        let name = name.clone();
        let inner = inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            if let Err(error) = guard.execute(&state).await {
                warn!(key = %name, error = %error, "scheduled body failed");
            }
        })
    })
}
