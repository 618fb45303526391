//! Custom tools declared by `*.tool.json` manifests.
//!
//! Discovery enumerates a directory at startup; hot-swap is out of scope.
//! Execution spawns the manifest's command as a subprocess and exchanges
//! one JSON document each way over stdin/stdout.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::runtime::{Tool, ToolContext};

const CUSTOM_TOOL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct CustomToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    /// argv; the first element is the program.
    pub command: Vec<String>,
}

fn default_parameters() -> Value {
    serde_json::json!({ "type": "object" })
}

impl CustomToolManifest {
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let manifest: CustomToolManifest =
            serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        if manifest.name.trim().is_empty() {
            return Err("manifest has an empty tool name".into());
        }
        if manifest.command.is_empty() {
            return Err("manifest has an empty command".into());
        }
        Ok(manifest)
    }
}

pub struct CustomTool {
    manifest: CustomToolManifest,
}

impl CustomTool {
    pub fn new(manifest: CustomToolManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait::async_trait]
impl Tool for CustomTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.manifest.name.clone(),
            description: self.manifest.description.clone(),
            parameters: self.manifest.parameters.clone(),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let mut cmd = Command::new(&self.manifest.command[0]);
        cmd.args(&self.manifest.command[1..])
            .current_dir(&ctx.workspace_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ToolOutcome::failure(
                    "spawn_failed",
                    format!("failed to spawn '{}': {e}", self.manifest.command[0]),
                )
            }
        };

        let payload = serde_json::json!({
            "input": input,
            "sessionId": ctx.session_id,
        });
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(payload.to_string().as_bytes()).await {
                return ToolOutcome::failure("io_error", format!("writing tool stdin: {e}"));
            }
            drop(stdin);
        }

        let waited = tokio::time::timeout(
            std::time::Duration::from_secs(CUSTOM_TOOL_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await;

        let output = match waited {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return ToolOutcome::failure("io_error", format!("waiting for tool: {e}"))
            }
            Err(_) => {
                return ToolOutcome::failure(
                    "timeout",
                    format!("custom tool exceeded {CUSTOM_TOOL_TIMEOUT_SECS}s"),
                )
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ToolOutcome::failure(
                "tool_failed",
                format!(
                    "exit status {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            );
        }

        match serde_json::from_slice::<Value>(&output.stdout) {
            Ok(result) => ToolOutcome::success(result),
            Err(e) => ToolOutcome::failure("bad_output", format!("tool emitted invalid JSON: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn manifest_load_rejects_empty_command() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.tool.json");
        std::fs::write(&path, r#"{"name": "x", "command": []}"#).unwrap();
        assert!(CustomToolManifest::load(&path).is_err());
    }

    #[test]
    fn manifest_load_parses_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("echo.tool.json");
        std::fs::write(
            &path,
            r#"{"name": "upcase", "description": "Upper-case text",
                "parameters": {"type": "object"}, "command": ["tr", "a-z", "A-Z"]}"#,
        )
        .unwrap();
        let manifest = CustomToolManifest::load(&path).unwrap();
        assert_eq!(manifest.name, "upcase");
        assert_eq!(manifest.command[0], "tr");
    }

    #[tokio::test]
    async fn subprocess_roundtrip() {
        // `cat` echoes the request payload back, which is valid JSON.
        let tool = CustomTool::new(CustomToolManifest {
            name: "cat".into(),
            description: String::new(),
            parameters: default_parameters(),
            command: vec!["cat".into()],
        });
        let ctx = ToolContext {
            workspace_dir: std::env::temp_dir(),
            mutable_roots: vec![],
            session_id: "s1".into(),
            provider_id: None,
        };

        let outcome = tool
            .execute(serde_json::json!({"text": "hi"}), &ctx)
            .await;
        assert!(outcome.ok);
        assert_eq!(outcome.output.unwrap()["input"]["text"], "hi");
    }

    #[tokio::test]
    async fn missing_binary_fails_cleanly() {
        let tool = CustomTool::new(CustomToolManifest {
            name: "nope".into(),
            description: String::new(),
            parameters: default_parameters(),
            command: vec!["definitely-not-a-real-binary-45123".into()],
        });
        let ctx = ToolContext {
            workspace_dir: std::env::temp_dir(),
            mutable_roots: vec![],
            session_id: "s1".into(),
            provider_id: None,
        };
        let outcome = tool.execute(Value::Null, &ctx).await;
        assert!(!outcome.ok);
        assert_eq!(outcome.code.as_deref(), Some("spawn_failed"));
    }
}
