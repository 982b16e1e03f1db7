//! Throttled execution of a nested run list.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    element::{Element, require_attribute},
    elements::fn_debounce::shared_body,
    proxy::{ElementProxy, ProxyContext},
    sync::{self, ThrottleOptions, Throttler},
    time::parse_duration,
};

#[derive(Debug, Default, Deserialize)]
struct FnThrottleProps {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    wait: Option<Value>,
    #[serde(default)]
    leading: Option<bool>,
    #[serde(default)]
    trailing: Option<bool>,
}

/// `fn-throttle: {name, wait, ...}` over `runs` — the body runs at most once
/// per window; extra triggers coalesce into one trailing invocation. Keyed
/// like [`FnDebounce`](super::FnDebounce).
pub struct FnThrottle {
    props: FnThrottleProps,
    inner: Option<Arc<tokio::sync::Mutex<ElementProxy>>>,
}

impl FnThrottle {
    /// Builds the element from its property mapping.
    pub fn from_props(props: Value) -> Result<Box<dyn Element>> {
        let props = match props {
            Value::Null => FnThrottleProps::default(),
            other => serde_json::from_value(other).context("invalid fn-throttle properties")?,
        };
        Ok(Box::new(FnThrottle { props, inner: None }))
    }
}

#[async_trait]
impl Element for FnThrottle {
    async fn execute(&mut self, _ctx: &mut ProxyContext, state: &Value) -> Result<Value> {
        let name = require_attribute("fn-throttle", "name", self.props.name.clone())?;
        let wait = parse_duration(&require_attribute("fn-throttle", "wait", self.props.wait.clone())?)?;
        let inner = require_attribute("fn-throttle", "runs", self.inner.clone())?;

        let options = ThrottleOptions {
            leading: self.props.leading.unwrap_or(true),
            trailing: self.props.trailing.unwrap_or(true),
        };
        let throttler = sync::obtain_throttler(&name, || Throttler::new(wait, options, shared_body(&name, inner)));
        throttler.call(state.clone());
        Ok(Value::Null)
    }

    fn attach_inner_runs(&mut self, inner: ElementProxy) -> Result<()> {
        self.inner = Some(Arc::new(tokio::sync::Mutex::new(inner)));
        Ok(())
    }

    fn process_exit_hook(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        let name = self.props.name.clone()?;
        Some(Box::new(move || {
            sync::remove_throttler(&name);
        }))
    }
}
