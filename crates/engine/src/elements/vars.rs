//! Variable declarations.
//!
//! `vars:` declares local entries on the owning scope; `globals:` declares
//! inheritable entries. Classification is explicit, never inferred from key
//! naming.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{element::Element, proxy::ProxyContext};

#[derive(Debug, Default, Deserialize)]
struct VarsProps {
    #[serde(default)]
    vars: Option<Value>,
    #[serde(default)]
    globals: Option<Value>,
}

/// Synthetic tag applying `vars`/`globals` mappings to the scope.
pub struct Vars {
    props: VarsProps,
}

impl Vars {
    /// Builds the element from the synthetic `{vars, globals}` properties.
    pub fn new(props: Value) -> Vars {
        let props = serde_json::from_value(props).unwrap_or_default();
        Vars { props }
    }
}

#[async_trait]
impl Element for Vars {
    async fn execute(&mut self, ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        if let Some(local) = &self.props.vars {
            ctx.scene.apply_vars(local, false);
        }
        if let Some(inheritable) = &self.props.globals {
            ctx.scene.apply_vars(inheritable, true);
        }
        Ok(Value::Null)
    }
}
