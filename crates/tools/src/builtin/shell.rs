//! `shell` tool -- foreground command execution with prefix policy,
//! timeout, and a bounded output buffer.

use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use drost_domain::config::ShellConfig;
use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::path_policy::resolve_in_roots;
use crate::runtime::{Tool, ToolContext};

#[derive(Debug, Deserialize)]
struct ShellRequest {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

pub struct ShellTool {
    config: ShellConfig,
}

impl ShellTool {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn policy_check(&self, command: &str) -> Result<(), ToolOutcome> {
        let trimmed = command.trim_start();
        if let Some(denied) = self
            .config
            .deny_command_prefixes
            .iter()
            .find(|p| trimmed.starts_with(p.as_str()))
        {
            return Err(ToolOutcome::failure(
                "policy_denied",
                format!("command matches denied prefix '{denied}'"),
            ));
        }
        if !self.config.allow_command_prefixes.is_empty()
            && !self
                .config
                .allow_command_prefixes
                .iter()
                .any(|p| trimmed.starts_with(p.as_str()))
        {
            return Err(ToolOutcome::failure(
                "policy_denied",
                "command does not match any allowed prefix",
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command in the workspace and return its output.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to execute" },
                    "workdir": { "type": "string", "description": "Working directory relative to the workspace" },
                    "timeout_ms": { "type": "integer", "minimum": 1 }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: ShellRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        if let Err(denied) = self.policy_check(&request.command) {
            return denied;
        }

        let workdir = match &request.workdir {
            Some(dir) => {
                match resolve_in_roots(dir, &ctx.workspace_dir, &ctx.mutable_roots) {
                    Ok(p) => p,
                    Err(e) => return ToolOutcome::failure(e.code(), e.to_string()),
                }
            }
            None => ctx.workspace_dir.clone(),
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&workdir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let timeout_ms = request.timeout_ms.unwrap_or(self.config.timeout_ms);
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            async {
                let child = cmd.spawn()?;
                child.wait_with_output().await
            },
        )
        .await;

        match waited {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let truncated = combined.len() > self.config.max_buffer_bytes;
                if truncated {
                    let mut cut = self.config.max_buffer_bytes;
                    while cut < combined.len() && !combined.is_char_boundary(cut) {
                        cut += 1;
                    }
                    combined.truncate(cut);
                }

                ToolOutcome::success(serde_json::json!({
                    "exit_code": output.status.code(),
                    "output": combined,
                    "truncated": truncated,
                }))
            }
            Ok(Err(e)) => ToolOutcome::failure("spawn_failed", format!("failed to run: {e}")),
            // Timeouts are a normal failure result, not a process-wide error.
            Err(_) => ToolOutcome::failure(
                "timeout",
                format!("command exceeded {timeout_ms}ms and was killed"),
            ),
        }
    }
}
