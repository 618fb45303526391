//! Git-backed `code.*` tools.
//!
//! All of them shell out to `git` in the workspace. Mutating operations
//! refuse to touch paths outside the mutable roots, and `code.patch`
//! rejects a patch whose declared base no longer matches HEAD.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::path_policy::{assert_in_mutable_roots, canonicalize, resolve_in_roots};
use crate::runtime::{Tool, ToolContext};

const GIT_OUTPUT_CAP: usize = 200_000;

/// All five `code.*` tools.
pub fn code_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(CodeStatus),
        Arc::new(CodeDiff),
        Arc::new(CodePatch),
        Arc::new(CodeSearch),
        Arc::new(CodeReadContext),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// git subprocess helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn git(workdir: &Path, args: &[&str], stdin: Option<&str>) -> Result<String, ToolOutcome> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(workdir)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolOutcome::failure("git_unavailable", format!("spawning git: {e}")))?;

    if let Some(data) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(data.as_bytes())
                .await
                .map_err(|e| ToolOutcome::failure("io_error", format!("writing git stdin: {e}")))?;
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ToolOutcome::failure("io_error", format!("waiting for git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolOutcome::failure(
            "git_failed",
            format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
        ));
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.len() > GIT_OUTPUT_CAP {
        let mut cut = GIT_OUTPUT_CAP;
        while cut < text.len() && !text.is_char_boundary(cut) {
            cut += 1;
        }
        text.truncate(cut);
    }
    Ok(text)
}

async fn current_head(workdir: &Path) -> Result<String, ToolOutcome> {
    Ok(git(workdir, &["rev-parse", "HEAD"], None).await?.trim().to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code.status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CodeStatus;

#[async_trait::async_trait]
impl Tool for CodeStatus {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code.status".into(),
            description: "Current git branch, HEAD and working-tree changes.".into(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolOutcome {
        let branch = match git(&ctx.workspace_dir, &["rev-parse", "--abbrev-ref", "HEAD"], None).await {
            Ok(b) => b.trim().to_owned(),
            Err(o) => return o,
        };
        let head = match current_head(&ctx.workspace_dir).await {
            Ok(h) => h,
            Err(o) => return o,
        };
        let status = match git(&ctx.workspace_dir, &["status", "--porcelain"], None).await {
            Ok(s) => s,
            Err(o) => return o,
        };
        let changes: Vec<&str> = status.lines().collect();

        ToolOutcome::success(serde_json::json!({
            "branch": branch,
            "git_head": head,
            "changes": changes,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code.diff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct DiffRequest {
    #[serde(default)]
    path: Option<String>,
}

pub struct CodeDiff;

#[async_trait::async_trait]
impl Tool for CodeDiff {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code.diff".into(),
            description: "Unified diff of the working tree, optionally narrowed to one path.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: DiffRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        let mut args: Vec<String> = vec!["diff".into(), "HEAD".into()];
        if let Some(path) = &request.path {
            if let Err(e) = resolve_in_roots(path, &ctx.workspace_dir, &ctx.mutable_roots) {
                return ToolOutcome::failure(e.code(), e.to_string());
            }
            args.push("--".into());
            args.push(path.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        match git(&ctx.workspace_dir, &arg_refs, None).await {
            Ok(diff) => ToolOutcome::success(serde_json::json!({ "diff": diff })),
            Err(o) => o,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code.patch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct PatchRequest {
    patch: String,
    #[serde(default)]
    expected_base: Option<ExpectedBase>,
}

#[derive(Debug, Deserialize)]
struct ExpectedBase {
    git_head: String,
}

pub struct CodePatch;

#[async_trait::async_trait]
impl Tool for CodePatch {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code.patch".into(),
            description: "Apply a unified diff to the working tree. Rejects the patch when \
                          expected_base.git_head no longer matches HEAD."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "patch": { "type": "string" },
                    "expected_base": {
                        "type": "object",
                        "properties": { "git_head": { "type": "string" } },
                        "required": ["git_head"]
                    }
                },
                "required": ["patch"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: PatchRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        if let Some(base) = &request.expected_base {
            let head = match current_head(&ctx.workspace_dir).await {
                Ok(h) => h,
                Err(o) => return o,
            };
            if head != base.git_head {
                return ToolOutcome::failure(
                    "stale_revision",
                    format!("HEAD is {head}, patch was built against {}", base.git_head),
                );
            }
        }

        // Every target named by the patch must live inside a mutable root.
        for target in patch_targets(&request.patch) {
            let Ok(resolved) = canonicalize(&ctx.workspace_dir.join(&target)) else {
                return ToolOutcome::failure(
                    "path_outside_roots",
                    format!("patch target '{target}' cannot be resolved"),
                );
            };
            if let Err(e) = assert_in_mutable_roots(&target, &resolved, &ctx.mutable_roots) {
                return ToolOutcome::failure(e.code(), e.to_string());
            }
        }

        match git(&ctx.workspace_dir, &["apply", "--whitespace=nowarn", "-"], Some(&request.patch))
            .await
        {
            Ok(_) => ToolOutcome::success(serde_json::json!({ "applied": true })),
            Err(o) => o,
        }
    }
}

/// Paths named by `+++ b/<path>` and `--- a/<path>` lines.
fn patch_targets(patch: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for line in patch.lines() {
        let path = line
            .strip_prefix("+++ b/")
            .or_else(|| line.strip_prefix("--- a/"));
        if let Some(path) = path {
            let path = path.trim();
            if path != "/dev/null" && !targets.iter().any(|t| t == path) {
                targets.push(path.to_owned());
            }
        }
    }
    targets
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code.search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SearchRequest {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

pub struct CodeSearch;

#[async_trait::async_trait]
impl Tool for CodeSearch {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code.search".into(),
            description: "Search tracked files with git grep.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: SearchRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        let mut args: Vec<String> = vec!["grep".into(), "-n".into(), request.pattern.clone()];
        if let Some(path) = &request.path {
            args.push("--".into());
            args.push(path.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        match git(&ctx.workspace_dir, &arg_refs, None).await {
            Ok(found) => {
                let matches: Vec<&str> = found.lines().take(500).collect();
                ToolOutcome::success(serde_json::json!({
                    "pattern": request.pattern,
                    "matches": matches,
                }))
            }
            // `git grep` exits 1 on zero matches; report that as empty.
            Err(o) if o.error.as_deref().is_some_and(|e| e.trim_end().ends_with("failed:")) => {
                ToolOutcome::success(serde_json::json!({
                    "pattern": request.pattern,
                    "matches": Vec::<String>::new(),
                }))
            }
            Err(o) => o,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// code.read_context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadContextRequest {
    path: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default = "default_context")]
    context: usize,
}

fn default_context() -> usize {
    20
}

pub struct CodeReadContext;

#[async_trait::async_trait]
impl Tool for CodeReadContext {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "code.read_context".into(),
            description: "Read a numbered slice of a file around a line.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "line": { "type": "integer", "minimum": 1 },
                    "context": { "type": "integer", "minimum": 0 }
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome {
        let request: ReadContextRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        let path = match resolve_in_roots(&request.path, &ctx.workspace_dir, &ctx.mutable_roots) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::failure(e.code(), e.to_string()),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolOutcome::failure(
                    "io_error",
                    format!("failed to read '{}': {e}", request.path),
                )
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let center = request.line.unwrap_or(1).saturating_sub(1);
        let start = center.saturating_sub(request.context);
        let end = (center + request.context + 1).min(lines.len());

        let numbered: Vec<String> = lines[start.min(lines.len())..end]
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{:>5} | {l}", start + i + 1))
            .collect();

        ToolOutcome::success(serde_json::json!({
            "path": request.path,
            "start_line": start + 1,
            "end_line": end,
            "content": numbered.join("\n"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_targets_extracted() {
        let patch = "\
--- a/src/main.rs
+++ b/src/main.rs
@@ -1 +1 @@
-old
+new
--- /dev/null
+++ b/src/new_file.rs
@@ -0,0 +1 @@
+created
";
        let targets = patch_targets(patch);
        assert_eq!(targets, vec!["src/main.rs", "src/new_file.rs"]);
    }

    #[tokio::test]
    async fn patch_with_stale_base_rejected() {
        // An on-the-fly repo so HEAD is real.
        let dir = tempfile::TempDir::new().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .env("GIT_AUTHOR_NAME", "t")
                .env("GIT_AUTHOR_EMAIL", "t@t")
                .env("GIT_COMMITTER_NAME", "t")
                .env("GIT_COMMITTER_EMAIL", "t@t")
                .output()
                .unwrap()
        };
        run(&["init", "-q"]);
        std::fs::write(dir.path().join("f.txt"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "init"]);

        let ctx = ToolContext {
            workspace_dir: dir.path().to_path_buf(),
            mutable_roots: vec![dir.path().to_path_buf()],
            session_id: "s1".into(),
            provider_id: None,
        };

        let outcome = CodePatch
            .execute(
                serde_json::json!({
                    "patch": "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-hello\n+bye\n",
                    "expected_base": { "git_head": "0000000000000000000000000000000000000000" }
                }),
                &ctx,
            )
            .await;
        assert!(!outcome.ok);
        assert_eq!(outcome.code.as_deref(), Some("stale_revision"));
    }

    #[tokio::test]
    async fn read_context_numbers_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("src.txt"),
            (1..=50).map(|i| format!("line{i}\n")).collect::<String>(),
        )
        .unwrap();

        let ctx = ToolContext {
            workspace_dir: dir.path().to_path_buf(),
            mutable_roots: vec![dir.path().to_path_buf()],
            session_id: "s1".into(),
            provider_id: None,
        };

        let outcome = CodeReadContext
            .execute(
                serde_json::json!({"path": "src.txt", "line": 25, "context": 2}),
                &ctx,
            )
            .await;
        let output = outcome.output.unwrap();
        assert_eq!(output["start_line"], 23);
        assert!(output["content"].as_str().unwrap().contains("25 | line25"));
    }
}
