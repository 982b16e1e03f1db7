//! Embeds a nested playbook in a child scene.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use runbook_types::PlaybookDocument;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    element::{Element, missing_attribute},
    group::Group,
    proxy::{ElementProxy, ProxyContext},
};

#[derive(Debug, Default, Deserialize)]
struct SceneProps {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// `scene: {path}` or `scene: {content}` — the nested run list executes in a
/// child scene whose inheritable variables are copied at this moment.
pub struct SceneTag {
    props: SceneProps,
}

impl SceneTag {
    /// Builds the element; a bare string is the `path` shorthand.
    pub fn from_props(props: Value) -> Result<Box<dyn Element>> {
        let props = match props {
            Value::String(path) => SceneProps {
                path: Some(path),
                content: None,
            },
            Value::Null => SceneProps::default(),
            other => serde_json::from_value(other).context("invalid scene properties")?,
        };
        Ok(Box::new(SceneTag { props }))
    }
}

#[async_trait]
impl Element for SceneTag {
    async fn execute(&mut self, ctx: &mut ProxyContext, state: &Value) -> Result<Value> {
        let (content, dir) = match (&self.props.path, &self.props.content) {
            (Some(path), _) => {
                let resolved = ctx.scene.resolve_path(path);
                let content = tokio::fs::read_to_string(&resolved)
                    .await
                    .with_context(|| format!("failed to read nested playbook: {}", resolved.display()))?;
                let dir = resolved.parent().map(PathBuf::from);
                (content, dir)
            }
            (None, Some(content)) => (content.clone(), ctx.scene.dir().map(PathBuf::from)),
            (None, None) => return Err(missing_attribute("scene", "path")),
        };

        let document: PlaybookDocument = serde_yaml::from_str(&content).context("nested playbook is not a step list or manifest")?;
        let manifest = document.into_manifest();

        let child_scene = ctx.scene.child_in_dir(dir);
        if let Some(vars) = &manifest.vars {
            child_scene.apply_vars(vars, false);
        }

        let group = Group::new(manifest.runs);
        let mut proxy = ElementProxy::new(Box::new(group), ProxyContext::new("group", child_scene));
        let outcome = proxy.execute(state).await;
        proxy.dispose().await;
        outcome
    }
}
