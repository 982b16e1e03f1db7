//! External process execution.

use std::process::Stdio;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::{io::AsyncReadExt, process::Child};
use tracing::debug;

use crate::{
    element::{Element, missing_attribute},
    proxy::ProxyContext,
};

/// `exec: [bin, args...]` — runs a program, captures its output, and fails
/// on a non-zero exit. Disposal kills an in-flight child.
pub struct Exec {
    commands: Vec<String>,
    child: Option<Child>,
}

impl Exec {
    /// Parses the rendered command list; a plain string is split on
    /// whitespace.
    pub fn new(props: Value) -> Exec {
        let commands = match props {
            Value::String(line) => line.split_whitespace().map(str::to_string).collect(),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(text) => text,
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        Exec { commands, child: None }
    }
}

#[async_trait]
impl Element for Exec {
    async fn execute(&mut self, ctx: &mut ProxyContext, _state: &Value) -> Result<Value> {
        if self.commands.is_empty() {
            return Err(missing_attribute("exec", "commands"));
        }
        debug!(command = %self.commands.join(" "), "spawning process");

        let (binary, arguments) = self.commands.split_first().context("command list is empty")?;
        let mut command = tokio::process::Command::new(binary);
        command.args(arguments).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = ctx.scene.dir() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().with_context(|| format!("failed to spawn '{binary}'"))?;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.child = Some(child);

        let Some(child) = self.child.as_mut() else {
            bail!("child process vanished before wait");
        };
        let (status, stdout, stderr) = tokio::join!(child.wait(), read_pipe(stdout_pipe), read_pipe(stderr_pipe));
        self.child = None;

        let status = status.context("failed to wait for child process")?;
        if !status.success() {
            bail!("process '{binary}' exited with {status}: {}", stderr.trim());
        }
        Ok(json!({
            "code": status.code(),
            "stdout": stdout,
            "stderr": stderr,
        }))
    }

    async fn dispose(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            // Request cancellation of the in-flight process.
            let _ = child.start_kill();
        }
        Ok(())
    }
}

async fn read_pipe<R: AsyncReadExt + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buffer = String::new();
    let _ = pipe.read_to_string(&mut buffer).await;
    buffer
}
