//! Adapter that shells out to an external automation program.
//!
//! The program is invoked as `<command> <platform> <operation>`, receives the
//! [`AdapterRequest`] as JSON on stdin, and must print a JSON object on
//! stdout. A non-zero exit is a failure carrying stderr.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::adapters::{AdapterError, AdapterRequest, PlatformAdapter};

const STDERR_LIMIT: usize = 2_000;

#[derive(Debug, Clone)]
pub struct ScriptAdapter {
    program: String,
    args: Vec<String>,
}

impl ScriptAdapter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits on whitespace; no shell quoting.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    async fn invoke(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        let input = serde_json::to_vec(req)
            .map_err(|e| AdapterError::Failed(format!("could not encode adapter request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(req.platform().as_str())
            .arg(req.operation().as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AdapterError::Failed(format!("could not start adapter `{}`: {e}", self.program))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!(error = %e, "adapter did not read its request");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AdapterError::Failed(format!("adapter process error: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
            return Err(AdapterError::Failed(if stderr.is_empty() {
                format!("adapter exited with {}", output.status)
            } else {
                stderr
            }));
        }

        match serde_json::from_slice::<Value>(&output.stdout) {
            Ok(v @ Value::Object(_)) => Ok(v),
            Ok(_) => Err(AdapterError::Failed(
                "adapter output is not a JSON object".to_string(),
            )),
            Err(e) => Err(AdapterError::Failed(format!(
                "adapter output is not valid JSON: {e}"
            ))),
        }
    }
}

#[async_trait]
impl PlatformAdapter for ScriptAdapter {
    async fn link(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        self.invoke(req).await
    }

    async fn sync(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        self.invoke(req).await
    }

    async fn register_reply(&self, req: &AdapterRequest) -> Result<Value, AdapterError> {
        self.invoke(req).await
    }
}
