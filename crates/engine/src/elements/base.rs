//! No-op placeholder for bare name/conditional-only steps.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::{element::Element, proxy::ProxyContext};

/// Does nothing and returns null.
pub struct Base;

#[async_trait]
impl Element for Base {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        Ok(Value::Null)
    }
}
