//! Prints its (already interpolated) properties and returns them.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::{element::Element, proxy::ProxyContext};

/// `echo: <value>` — the rendered value is the step result.
pub struct Echo {
    content: Value,
}

impl Echo {
    /// Wraps the rendered tag properties.
    pub fn new(content: Value) -> Echo {
        Echo { content }
    }
}

#[async_trait]
impl Element for Echo {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        match &self.content {
            Value::String(text) => info!("{text}"),
            other => info!("{other}"),
        }
        Ok(self.content.clone())
    }
}
