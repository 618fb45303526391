//! Redacted tool-trace records.
//!
//! One JSONL line per execution under the state dir. Every input and
//! output passes through the secret redaction walk before it is written.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::Value;

use drost_domain::redact::redact;
use drost_domain::tool::ToolOutcome;

pub const TRACES_FILE: &str = "tool-traces.jsonl";

pub struct TraceWriter {
    path: PathBuf,
    // Serializes appends; traces from concurrent sessions interleave lines.
    write_lock: Mutex<()>,
}

impl TraceWriter {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(TRACES_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one redacted trace record. Trace failures are logged and
    /// swallowed; tracing must never fail a tool call.
    pub fn record(
        &self,
        session_id: &str,
        tool: &str,
        provider_id: Option<&str>,
        input: &Value,
        outcome: &ToolOutcome,
        duration_ms: u64,
    ) {
        let record = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "sessionId": session_id,
            "tool": tool,
            "providerId": provider_id,
            "ok": outcome.ok,
            "code": outcome.code,
            "durationMs": duration_ms,
            "input": redact(input),
            "output": outcome.output.as_ref().map(redact),
            "error": outcome.error,
        });

        let mut line = record.to_string();
        line.push('\n');

        let _guard = self.write_lock.lock();
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to append tool trace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn traces_are_redacted() {
        let dir = TempDir::new().unwrap();
        let writer = TraceWriter::new(dir.path());

        writer.record(
            "s1",
            "web",
            Some("openai"),
            &serde_json::json!({"api_key": "super-secret", "query": "news"}),
            &ToolOutcome::success(serde_json::json!({"token": "abc"})),
            42,
        );

        let raw = std::fs::read_to_string(writer.path()).unwrap();
        assert!(!raw.contains("super-secret"));
        assert!(raw.contains("[REDACTED]"));
        assert!(raw.contains("news"));

        let record: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(record["tool"], "web");
        assert_eq!(record["durationMs"], 42);
    }
}
