//! The per-step wrapper: identity, control attributes, and lifecycle.

use std::{sync::Arc, time::Instant};

use anyhow::Result;
use runbook_types::RunbookError;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    element::Element,
    resolve::{self, ScopeContext},
    scene::Scene,
};

/// Control-flow metadata carried alongside one element.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    /// Tag that constructed the element.
    pub tag: String,
    /// Interpolated display name.
    pub name: Option<String>,
    /// When set, the step's result is stored into the scope under this name.
    pub id: Option<String>,
    /// Owning scene; non-owning with respect to the root.
    pub scene: Arc<Scene>,
    /// Continue the pass even if this step fails.
    pub force: bool,
    /// Verbose per-step logging.
    pub debug: bool,
    /// Loop index or mapping key when iterating.
    pub loop_key: Option<Value>,
    /// Loop element when iterating.
    pub loop_value: Option<Value>,
    /// Expression evaluated after execution; truthy raises the skip-next
    /// signal for the parent group.
    pub skip_next: Option<Value>,
    /// Variable assignments applied to the scope before execution.
    pub pre_vars: Option<Value>,
    /// Variable assignments applied to the scope after execution.
    pub post_vars: Option<Value>,
    /// Captured result of the last execution.
    pub result: Value,
    /// Signal telling the parent group to stop processing further siblings.
    pub is_skip_next: bool,
}

impl ProxyContext {
    /// Minimal context for a tag executing in `scene`.
    pub fn new(tag: impl Into<String>, scene: Arc<Scene>) -> Self {
        ProxyContext {
            tag: tag.into(),
            name: None,
            id: None,
            scene,
            force: false,
            debug: false,
            loop_key: None,
            loop_value: None,
            skip_next: None,
            pre_vars: None,
            post_vars: None,
            result: Value::Null,
            is_skip_next: false,
        }
    }

    /// Display label: the step name when present, the tag otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.tag)
    }

    /// Expression-evaluation snapshot including this step's loop position.
    pub fn scope_context(&self, state: &Value) -> ScopeContext {
        self.scene.context(self.loop_key.clone(), self.loop_value.clone(), state)
    }
}

/// Wraps exactly one element with its control metadata and a two-phase
/// lifecycle: execute, then dispose exactly once on every exit path.
pub struct ElementProxy {
    element: Box<dyn Element>,
    /// Control metadata, visible to the element during execution.
    pub ctx: ProxyContext,
    disposed: bool,
}

impl ElementProxy {
    /// Wraps `element` with `ctx`.
    pub fn new(element: Box<dyn Element>, ctx: ProxyContext) -> ElementProxy {
        ElementProxy {
            element,
            ctx,
            disposed: false,
        }
    }

    /// Runs the element, capturing its result and post-execution signals.
    ///
    /// Failures keep the typed taxonomy when the element raised one and are
    /// classified as execution failures otherwise. Disposal is the caller's
    /// responsibility so it can be sequenced with batching disciplines; it
    /// must follow on every path.
    pub async fn execute(&mut self, state: &Value) -> Result<Value> {
        if let Some(pre_vars) = self.ctx.pre_vars.clone() {
            let context = self.ctx.scope_context(state);
            self.ctx.scene.apply_vars(&self.ctx.scene.render(&pre_vars, &context), false);
        }

        debug!(tag = %self.ctx.tag, step = %self.ctx.label(), "step started");
        let started_at = Instant::now();
        let outcome = self.element.execute(&mut self.ctx, state).await;
        let elapsed_ms = started_at.elapsed().as_millis();

        match outcome {
            Ok(value) => {
                self.ctx.result = value.clone();
                if let Some(id) = &self.ctx.id {
                    self.ctx.scene.set_local(id.clone(), value.clone());
                }
                if let Some(post_vars) = self.ctx.post_vars.clone() {
                    let context = self.ctx.scope_context(state);
                    self.ctx.scene.apply_vars(&self.ctx.scene.render(&post_vars, &context), false);
                }
                if let Some(skip_next) = &self.ctx.skip_next {
                    let context = self.ctx.scope_context(state);
                    self.ctx.is_skip_next = resolve::eval_condition_attribute(skip_next, &context);
                }
                if self.ctx.debug {
                    info!(tag = %self.ctx.tag, step = %self.ctx.label(), elapsed_ms, result = %value, "step finished");
                } else {
                    debug!(tag = %self.ctx.tag, step = %self.ctx.label(), elapsed_ms, "step finished");
                }
                Ok(value)
            }
            Err(error) => {
                if error.downcast_ref::<RunbookError>().is_some() {
                    return Err(error);
                }
                Err(RunbookError::Execution {
                    step: self.ctx.label().to_string(),
                    message: format!("{error:#}"),
                }
                .into())
            }
        }
    }

    /// Releases the element's resources. Idempotent: only the first call
    /// reaches the element.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Err(error) = self.element.dispose().await {
            warn!(tag = %self.ctx.tag, step = %self.ctx.label(), error = %error, "step disposal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::root::{RootScene, RootSceneOptions};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingElement {
        dispose_count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Element for CountingElement {
        async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(json!("ok"))
        }

        async fn dispose(&mut self) -> Result<()> {
            self.dispose_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn proxy_with(fail: bool, dispose_count: Arc<AtomicUsize>) -> ElementProxy {
        let root = RootScene::from_content("runs: []", RootSceneOptions::default()).expect("root");
        ElementProxy::new(
            Box::new(CountingElement { dispose_count, fail }),
            ProxyContext::new("counting", root.scene().clone()),
        )
    }

    #[tokio::test]
    async fn dispose_runs_exactly_once_even_when_called_twice() {
        let dispose_count = Arc::new(AtomicUsize::new(0));
        let mut proxy = proxy_with(false, dispose_count.clone());
        proxy.execute(&Value::Null).await.expect("executes");
        proxy.dispose().await;
        proxy.dispose().await;
        assert_eq!(dispose_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_classified_as_execution_errors() {
        let dispose_count = Arc::new(AtomicUsize::new(0));
        let mut proxy = proxy_with(true, dispose_count.clone());
        let error = proxy.execute(&Value::Null).await.expect_err("fails");
        proxy.dispose().await;
        assert!(matches!(
            error.downcast_ref::<RunbookError>(),
            Some(RunbookError::Execution { .. })
        ));
        assert_eq!(dispose_count.load(Ordering::SeqCst), 1);
    }
}
