//! Suspends the current chain for a duration.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::{
    element::{Element, missing_attribute},
    proxy::ProxyContext,
    time::parse_duration,
};

/// `sleep: 500ms` — also accepts `2s`, `1m`, or bare milliseconds.
pub struct Sleep {
    duration: Value,
}

impl Sleep {
    /// Wraps the rendered duration attribute.
    pub fn new(duration: Value) -> Sleep {
        Sleep { duration }
    }
}

#[async_trait]
impl Element for Sleep {
    async fn execute(&mut self, _ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        let duration = match &self.duration {
            Value::Null => return Err(missing_attribute("sleep", "duration")),
            other => parse_duration(other)?,
        };
        tokio::time::sleep(duration).await;
        Ok(Value::Null)
    }
}
