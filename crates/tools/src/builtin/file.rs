//! `file` tool -- workspace file I/O constrained by the path policy.

use serde::Deserialize;
use serde_json::Value;

use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::path_policy::resolve_in_roots;
use crate::runtime::{Tool, ToolContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
enum FileRequest {
    Read {
        path: String,
        #[serde(default)]
        offset: Option<usize>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Write {
        path: String,
        content: String,
    },
    Append {
        path: String,
        content: String,
    },
    List {
        #[serde(default = "default_dot")]
        path: String,
    },
    Edit {
        path: String,
        diff: String,
    },
}

fn default_dot() -> String {
    ".".into()
}

pub struct FileTool;

#[async_trait::async_trait]
impl Tool for FileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file".into(),
            description: "Read, write, append, list, or edit files inside the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["read", "write", "append", "list", "edit"] },
                    "path": { "type": "string", "description": "Path relative to the workspace root" },
                    "content": { "type": "string" },
                    "diff": { "type": "string", "description": "Unified diff to apply (edit); @@ line numbers are optional hints" },
                    "offset": { "type": "integer", "minimum": 0 },
                    "limit": { "type": "integer", "minimum": 0 }
                },
                "required": ["action"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: FileRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        match request {
            FileRequest::Read { path, offset, limit } => read(ctx, &path, offset, limit).await,
            FileRequest::Write { path, content } => write(ctx, &path, &content).await,
            FileRequest::Append { path, content } => append(ctx, &path, &content).await,
            FileRequest::List { path } => list(ctx, &path).await,
            FileRequest::Edit { path, diff } => edit(ctx, &path, &diff).await,
        }
    }
}

fn resolve(ctx: &ToolContext, requested: &str) -> Result<std::path::PathBuf, ToolOutcome> {
    resolve_in_roots(requested, &ctx.workspace_dir, &ctx.mutable_roots)
        .map_err(|e| ToolOutcome::failure(e.code(), e.to_string()))
}

async fn read(
    ctx: &ToolContext,
    requested: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> ToolOutcome {
    let path = match resolve(ctx, requested) {
        Ok(p) => p,
        Err(o) => return o,
    };

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            return ToolOutcome::failure("io_error", format!("failed to read '{requested}': {e}"))
        }
    };

    let lines: Vec<&str> = content.lines().collect();
    let total_lines = lines.len();
    let offset = offset.unwrap_or(0);
    let limit = limit.unwrap_or(total_lines.saturating_sub(offset));
    let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

    ToolOutcome::success(serde_json::json!({
        "path": requested,
        "content": selected.join("\n"),
        "total_lines": total_lines,
        "offset": offset,
        "lines_returned": selected.len(),
    }))
}

async fn write(ctx: &ToolContext, requested: &str, content: &str) -> ToolOutcome {
    let path = match resolve(ctx, requested) {
        Ok(p) => p,
        Err(o) => return o,
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolOutcome::failure("io_error", format!("creating parent directory: {e}"));
        }
    }

    // Atomic write: temp sibling, then rename.
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = tokio::fs::write(&tmp_path, content).await {
        return ToolOutcome::failure("io_error", format!("writing temp file: {e}"));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return ToolOutcome::failure("io_error", format!("renaming into place: {e}"));
    }

    ToolOutcome::success(serde_json::json!({
        "path": requested,
        "bytes_written": content.len(),
    }))
}

async fn append(ctx: &ToolContext, requested: &str, content: &str) -> ToolOutcome {
    let path = match resolve(ctx, requested) {
        Ok(p) => p,
        Err(o) => return o,
    };

    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolOutcome::failure("io_error", format!("creating parent directory: {e}"));
        }
    }

    let existing = tokio::fs::read(&path).await.unwrap_or_default();
    let mut combined = existing;
    combined.extend_from_slice(content.as_bytes());
    match tokio::fs::write(&path, &combined).await {
        Ok(()) => ToolOutcome::success(serde_json::json!({
            "path": requested,
            "bytes_appended": content.len(),
        })),
        Err(e) => ToolOutcome::failure("io_error", format!("appending to '{requested}': {e}")),
    }
}

async fn list(ctx: &ToolContext, requested: &str) -> ToolOutcome {
    let path = match resolve(ctx, requested) {
        Ok(p) => p,
        Err(o) => return o,
    };

    let mut read_dir = match tokio::fs::read_dir(&path).await {
        Ok(r) => r,
        Err(e) => {
            return ToolOutcome::failure("io_error", format!("listing '{requested}': {e}"))
        }
    };

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let meta = entry.metadata().await.ok();
        entries.push(serde_json::json!({
            "name": entry.file_name().to_string_lossy(),
            "is_dir": meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
            "size": meta.map(|m| m.len()).unwrap_or(0),
        }));
    }
    entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    ToolOutcome::success(serde_json::json!({
        "path": requested,
        "count": entries.len(),
        "entries": entries,
    }))
}

/// Apply unified-diff hunks with exact, indent-normalised, and fuzzy
/// context matching (see [`super::edit`]).
async fn edit(ctx: &ToolContext, requested: &str, diff: &str) -> ToolOutcome {
    let path = match resolve(ctx, requested) {
        Ok(p) => p,
        Err(o) => return o,
    };

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            return ToolOutcome::failure("io_error", format!("failed to read '{requested}': {e}"))
        }
    };

    let (updated, hunks_applied) = match super::edit::apply_diff(&content, diff) {
        Ok(result) => result,
        Err(e) => return ToolOutcome::failure("edit_failed", format!("'{requested}': {e}")),
    };

    match tokio::fs::write(&path, updated).await {
        Ok(()) => ToolOutcome::success(serde_json::json!({
            "path": requested,
            "hunks_applied": hunks_applied,
        })),
        Err(e) => ToolOutcome::failure("io_error", format!("writing '{requested}': {e}")),
    }
}
