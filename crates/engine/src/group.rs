//! The composite interpreter.
//!
//! A group owns an ordered list of step descriptors and turns them into
//! executed proxies in one left-to-right pass: includes are spliced in,
//! only/skip filtering applies, templates register and inherit, the tag is
//! classified, the conditional chain gates, loops expand, and each resulting
//! proxy is dispatched sequentially, into the async batch, or detached to
//! the root's background registry.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::future::try_join_all;
use runbook_types::StepDescriptor;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::{
    element::Element,
    proxy::{ElementProxy, ProxyContext},
    registry::TagResolver,
    resolve,
    root::RootScene,
    scene::Scene,
};

/// Composite element interpreting an ordered descriptor list.
pub struct Group {
    runs: Vec<StepDescriptor>,
}

impl Group {
    /// Group over an already-parsed step list.
    pub fn new(runs: Vec<StepDescriptor>) -> Group {
        Group { runs }
    }

    /// Group over a raw `runs` attribute value.
    pub fn from_value(value: Value) -> Result<Group> {
        let runs: Vec<StepDescriptor> = serde_json::from_value(value).context("'runs' must be a list of step mappings")?;
        Ok(Group::new(runs))
    }
}

#[async_trait]
impl Element for Group {
    async fn execute(&mut self, ctx: &mut ProxyContext, state: &Value) -> Result<Value> {
        let results = interpret(self.runs.clone(), ctx.scene.clone(), state).await?;
        Ok(Value::Array(results))
    }
}

/// Everything needed to construct one proxy, shared across loop iterations.
struct StepPlan {
    tag: String,
    props: Value,
    runs: Option<Value>,
    name: Option<Value>,
    id: Option<String>,
    force: bool,
    debug: bool,
    skip_next: Option<Value>,
    pre_vars: Option<Value>,
    post_vars: Option<Value>,
}

enum DispatchMode {
    Sequential,
    AsyncBatch,
    Detached,
}

/// In-flight async-batch member and the result slot it will fill.
type BatchMember = (usize, JoinHandle<Result<Value>>);

async fn interpret(runs: Vec<StepDescriptor>, scene: Arc<Scene>, state: &Value) -> Result<Vec<Value>> {
    let root = scene.root()?;
    let mut steps = resolve_includes(runs, &scene).await?;

    if steps.iter().any(StepDescriptor::is_only) {
        steps.retain(|step| step.is_only() || step.is_template());
    }
    steps.retain(|step| !step.is_skipped());

    let mut results: Vec<Option<Value>> = Vec::new();
    let mut batch: Vec<BatchMember> = Vec::new();

    let pass_outcome = run_pass(steps, &scene, &root, state, &mut results, &mut batch).await;
    // Whatever ended the pass, the batch is joined (wait-for-all) so no
    // member is left running against a finished group.
    let join_outcome = join_batch(&mut batch, &mut results).await;
    pass_outcome?;
    join_outcome?;

    Ok(results.into_iter().map(|slot| slot.unwrap_or(Value::Null)).collect())
}

async fn run_pass(
    steps: Vec<StepDescriptor>,
    scene: &Arc<Scene>,
    root: &Arc<RootScene>,
    state: &Value,
    results: &mut Vec<Option<Value>>,
    batch: &mut Vec<BatchMember>,
) -> Result<()> {
    let mut passed_condition = false;

    for mut descriptor in steps {
        descriptor.normalize_async_shorthand();

        let inherit = descriptor.take("<-");
        let export = descriptor.take("->");
        descriptor.take("skip");
        descriptor.take("only");
        descriptor.take("include");

        // A template never executes, even when it also carries a tag; the
        // flag itself is stripped so exported property sets stay clean.
        let is_template = descriptor.is_template();
        descriptor.take("template");

        if let Some(inherit) = inherit {
            let defaults = root.template_defaults(&inherit)?;
            descriptor.merge_defaults(&defaults);
        }
        if let Some(export) = export {
            let export_name = export.as_str().context("export marker '->' must be a template name")?;
            root.export_template(export_name, descriptor.0.clone());
        }
        if is_template {
            continue;
        }

        let runs_attr = descriptor.take("runs");
        let tag = descriptor.tag_name().map(str::to_string);

        let condition_if = descriptor.take("if");
        let mut condition_elseif = descriptor.take("elseif");
        if descriptor.0.contains_key("else") {
            descriptor.take("else");
            condition_elseif = Some(Value::Bool(true));
        }
        let has_condition = condition_if.is_some() || condition_elseif.is_some();

        // A matched chain member suppresses following elseif/else siblings;
        // the first non-chained sibling resets the flag.
        if passed_condition {
            if condition_elseif.is_some() {
                continue;
            }
            passed_condition = false;
        }

        let force = matches!(descriptor.take("force"), Some(Value::Bool(true)));
        let debug = matches!(descriptor.take("debug"), Some(Value::Bool(true)));
        let name = descriptor.take("name");
        let id = descriptor.take("id").and_then(|value| value.as_str().map(str::to_string));
        let vars_attr = descriptor.take("vars");
        let globals_attr = descriptor.take("globals");
        let async_attr = descriptor.take("async");
        let detach_attr = descriptor.take("detach");
        let loop_attr = descriptor.take("loop");
        let skip_next = descriptor.take("skip_next");
        let pre_vars = descriptor.take("pre_vars");
        let post_vars = descriptor.take("post_vars");

        let (tag, props) = match tag {
            Some(tag_name) => {
                let props = descriptor.take(&tag_name).unwrap_or(Value::Null);
                (tag_name, props)
            }
            None if vars_attr.is_some() || globals_attr.is_some() => {
                ("vars".to_string(), json!({"vars": vars_attr, "globals": globals_attr}))
            }
            None if runs_attr.is_some() => ("group".to_string(), Value::Null),
            None => ("base".to_string(), Value::Null),
        };

        if let Some(gate) = condition_elseif.as_ref().or(condition_if.as_ref()) {
            let context = scene.context(None, None, state);
            if !resolve::eval_condition_attribute(gate, &context) {
                continue;
            }
        }

        let mode = {
            let context = scene.context(None, None, state);
            let detached = detach_attr
                .map(|attribute| resolve::eval_condition_attribute(&attribute, &context))
                .unwrap_or(false);
            let batched = async_attr
                .map(|attribute| resolve::eval_condition_attribute(&attribute, &context))
                .unwrap_or(false);
            if detached {
                DispatchMode::Detached
            } else if batched {
                DispatchMode::AsyncBatch
            } else {
                DispatchMode::Sequential
            }
        };

        let plan = StepPlan {
            tag,
            props,
            runs: runs_attr,
            name,
            id,
            force,
            debug,
            skip_next,
            pre_vars,
            post_vars,
        };

        match loop_attr {
            None => {
                let raised_skip_next = dispatch(&plan, &mode, None, None, state, scene, root, results, batch).await?;
                passed_condition = has_condition;
                if raised_skip_next {
                    return Ok(());
                }
            }
            Some(loop_attr) => {
                let context = scene.context(None, None, state);
                match resolve::eval_value_attribute(&loop_attr, &context) {
                    Value::Array(items) => {
                        for (index, item) in items.into_iter().enumerate() {
                            let raised_skip_next =
                                dispatch(&plan, &mode, Some(json!(index)), Some(item), state, scene, root, results, batch).await?;
                            if raised_skip_next {
                                return Ok(());
                            }
                        }
                    }
                    Value::Object(entries) => {
                        for (key, item) in entries {
                            let raised_skip_next =
                                dispatch(&plan, &mode, Some(json!(key)), Some(item), state, scene, root, results, batch).await?;
                            if raised_skip_next {
                                return Ok(());
                            }
                        }
                    }
                    Value::Bool(true) => loop {
                        // While-style loop: the expression is re-evaluated
                        // against the scope after each iteration, so the body
                        // is expected to have side effects.
                        let raised_skip_next =
                            dispatch(&plan, &mode, None, Some(Value::Bool(true)), state, scene, root, results, batch).await?;
                        if raised_skip_next {
                            return Ok(());
                        }
                        let context = scene.context(None, None, state);
                        if !resolve::is_truthy(&resolve::eval_value_attribute(&loop_attr, &context)) {
                            break;
                        }
                    },
                    // Anything else means zero iterations.
                    _ => {}
                }
                passed_condition = has_condition;
            }
        }
    }

    Ok(())
}

/// Builds the proxy for one step (or loop iteration) and dispatches it under
/// the requested discipline. Returns whether the step raised skip-next.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    plan: &StepPlan,
    mode: &DispatchMode,
    loop_key: Option<Value>,
    loop_value: Option<Value>,
    state: &Value,
    scene: &Arc<Scene>,
    root: &Arc<RootScene>,
    results: &mut Vec<Option<Value>>,
    batch: &mut Vec<BatchMember>,
) -> Result<bool> {
    let mut proxy = build_proxy(plan, loop_key, loop_value, state, scene, root)?;

    match mode {
        DispatchMode::Detached => {
            let state = state.clone();
            let handle = tokio::spawn(async move {
                let outcome = proxy.execute(&state).await;
                proxy.dispose().await;
                if let Err(error) = outcome {
                    warn!(step = %proxy.ctx.label(), error = %error, "detached step failed");
                }
            });
            root.push_background_job(handle);
            Ok(false)
        }
        DispatchMode::AsyncBatch => {
            let state = state.clone();
            let force = plan.force;
            let handle = tokio::spawn(async move {
                let outcome = proxy.execute(&state).await;
                proxy.dispose().await;
                match outcome {
                    Ok(value) => Ok(value),
                    Err(error) if force => {
                        warn!(step = %proxy.ctx.label(), error = %error, "step failed but is flagged to continue");
                        Ok(Value::Null)
                    }
                    Err(error) => Err(error),
                }
            });
            results.push(None);
            batch.push((results.len() - 1, handle));
            Ok(false)
        }
        DispatchMode::Sequential => {
            // Barrier: the outstanding batch completes before a sequential
            // step starts, so two sequential siblings never overlap.
            join_batch(batch, results).await?;

            let outcome = proxy.execute(state).await;
            proxy.dispose().await;
            match outcome {
                Ok(value) => {
                    results.push(Some(value));
                    Ok(proxy.ctx.is_skip_next)
                }
                Err(error) if plan.force => {
                    warn!(step = %proxy.ctx.label(), error = %error, "step failed but is flagged to continue");
                    results.push(Some(Value::Null));
                    Ok(proxy.ctx.is_skip_next)
                }
                Err(error) => Err(error),
            }
        }
    }
}

fn build_proxy(
    plan: &StepPlan,
    loop_key: Option<Value>,
    loop_value: Option<Value>,
    state: &Value,
    scene: &Arc<Scene>,
    root: &Arc<RootScene>,
) -> Result<ElementProxy> {
    let context = scene.context(loop_key.clone(), loop_value.clone(), state);
    let rendered_props = resolve::interpolate_value(&plan.props, &context);

    let mut element: Box<dyn Element> = if plan.tag == "group" {
        let runs = plan.runs.clone().context("a bare 'runs' step requires a step list")?;
        Box::new(Group::from_value(runs)?)
    } else {
        let factory = root.registry().resolve(&plan.tag, scene)?;
        factory(rendered_props)?
    };

    if plan.tag != "group"
        && let Some(runs) = &plan.runs
    {
        let inner_group = Group::from_value(runs.clone())?;
        let inner_proxy = ElementProxy::new(Box::new(inner_group), ProxyContext::new("group", scene.clone()));
        element.attach_inner_runs(inner_proxy)?;
    }
    if let Some(hook) = element.process_exit_hook() {
        root.register_exit_hook(hook);
    }

    let mut ctx = ProxyContext::new(plan.tag.clone(), scene.clone());
    ctx.name = plan.name.as_ref().map(|name| match resolve::interpolate_value(name, &context) {
        Value::String(text) => text,
        other => other.to_string(),
    });
    ctx.id = plan.id.clone();
    ctx.force = plan.force;
    ctx.debug = plan.debug;
    ctx.loop_key = loop_key;
    ctx.loop_value = loop_value;
    ctx.skip_next = plan.skip_next.clone();
    ctx.pre_vars = plan.pre_vars.clone();
    ctx.post_vars = plan.post_vars.clone();
    Ok(ElementProxy::new(element, ctx))
}

/// Joins every outstanding batch member, filling its result slot. All
/// members run to completion; the first failure observed is surfaced.
async fn join_batch(batch: &mut Vec<BatchMember>, results: &mut [Option<Value>]) -> Result<()> {
    let mut first_error = None;
    for (slot, handle) in batch.drain(..) {
        match handle.await {
            Ok(Ok(value)) => results[slot] = Some(value),
            Ok(Err(error)) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!(join_error).context("async step aborted"));
                }
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

async fn resolve_includes(runs: Vec<StepDescriptor>, scene: &Arc<Scene>) -> Result<Vec<StepDescriptor>> {
    let mut include_sites: Vec<(usize, PathBuf)> = Vec::new();
    for (index, step) in runs.iter().enumerate() {
        if let Some(include) = step.get("include") {
            let path = include.as_str().context("'include' must be a file path")?;
            include_sites.push((index, scene.resolve_path(path)));
        }
    }
    if include_sites.is_empty() {
        return Ok(runs);
    }

    // Includes load concurrently; splicing goes from the highest index down
    // so earlier indices stay valid.
    let loaded = try_join_all(include_sites.iter().map(|(_, path)| load_steps(path.clone()))).await?;
    let mut steps = runs;
    for ((index, _), replacement) in include_sites.into_iter().zip(loaded).rev() {
        steps.splice(index..index + 1, replacement);
    }
    Ok(steps)
}

async fn load_steps(path: PathBuf) -> Result<Vec<StepDescriptor>> {
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read included steps: {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("included file is not a step list: {}", path.display()))
}
