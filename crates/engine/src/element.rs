//! The element contract implemented by leaf operations and composites.

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use runbook_types::RunbookError;
use serde_json::Value;

use crate::proxy::{ElementProxy, ProxyContext};

/// One unit of work. Leaf operations are opaque to the core; the composite
/// variant is [`crate::group::Group`].
///
/// `execute` receives the proxy context (scene, identity, loop position) and
/// the state object handed down by the parent step. `dispose` releases any
/// held resource and is called exactly once per proxy, on every exit path.
#[async_trait]
pub trait Element: Send {
    /// Runs the element and returns its result value.
    async fn execute(&mut self, ctx: &mut ProxyContext, state: &Value) -> Result<Value>;

    /// Releases held resources; called after execution, success or failure.
    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hands the element the proxy for its nested `runs` list.
    ///
    /// Only elements that wrap a body (debounce, throttle, lock, scene)
    /// accept one; everything else rejects the attribute.
    fn attach_inner_runs(&mut self, inner: ElementProxy) -> Result<()> {
        let _ = inner;
        bail!("this tag does not accept a nested 'runs' list");
    }

    /// Shutdown notification for long-lived or detached elements.
    ///
    /// When an element returns a hook, the group registers it with the root;
    /// the root runs every hook during disposal.
    fn process_exit_hook(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        None
    }
}

/// Constructor for a tag: turns the tag's properties into an element.
pub type ElementFactory = Arc<dyn Fn(Value) -> Result<Box<dyn Element>> + Send + Sync>;

/// The assertion taxonomy error for a missing required attribute.
pub fn missing_attribute(tag: &str, attribute: &str) -> anyhow::Error {
    RunbookError::Assertion {
        tag: tag.to_string(),
        attribute: attribute.to_string(),
    }
    .into()
}

/// Returns `value` or fails with the assertion taxonomy naming the tag and
/// the missing attribute.
pub fn require_attribute<T>(tag: &str, attribute: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| missing_attribute(tag, attribute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_attribute_builds_the_assertion_error() {
        let error = require_attribute::<String>("fn-lock", "name", None).expect_err("missing attribute fails");
        let downcast = error.downcast_ref::<RunbookError>().expect("taxonomy error");
        assert!(matches!(
            downcast,
            RunbookError::Assertion { tag, attribute } if tag == "fn-lock" && attribute == "name"
        ));
        assert_eq!(require_attribute("fn-lock", "name", Some(7)).expect("present"), 7);
    }
}
