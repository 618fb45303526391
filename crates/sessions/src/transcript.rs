//! Append-only JSONL logs per session.
//!
//! `<stem>.jsonl` is the human-readable transcript (one message per line);
//! `<stem>.full.jsonl` is the event log every runtime event is appended to.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use drost_domain::{Error, Result};

use crate::session_key::sanitize_session_id;

/// A single transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub timestamp: String,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Writes the per-session append-only logs.
pub struct TranscriptWriter {
    base_dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    /// Append one or more lines to a session's transcript.
    pub fn append(&self, session_id: &str, lines: &[TranscriptLine]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let path = self.transcript_path(session_id);
        let mut buf = String::new();
        for line in lines {
            let json = serde_json::to_string(line)
                .map_err(|e| Error::Other(format!("serializing transcript line: {e}")))?;
            buf.push_str(&json);
            buf.push('\n');
        }
        append_to(&path, &buf)
    }

    /// Append one runtime event to the session's full event log.
    pub fn append_event(&self, session_id: &str, event: &serde_json::Value) -> Result<()> {
        let path = self.event_log_path(session_id);
        let mut buf = serde_json::to_string(event)
            .map_err(|e| Error::Other(format!("serializing event: {e}")))?;
        buf.push('\n');
        append_to(&path, &buf)
    }

    /// Helper to create a transcript line with the current timestamp.
    pub fn line(role: &str, content: &str) -> TranscriptLine {
        TranscriptLine {
            timestamp: Utc::now().to_rfc3339(),
            role: role.to_owned(),
            content: content.to_owned(),
            metadata: None,
        }
    }

    /// Read back a transcript, skipping malformed lines.
    pub fn read(&self, session_id: &str) -> Result<Vec<TranscriptLine>> {
        let path = self.transcript_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut lines = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptLine>(line) {
                Ok(tl) => lines.push(tl),
                Err(e) => {
                    tracing::warn!(
                        session_id = session_id,
                        error = %e,
                        "skipping malformed transcript line"
                    );
                }
            }
        }
        Ok(lines)
    }

    pub fn transcript_path(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.jsonl", sanitize_session_id(session_id)))
    }

    pub fn event_log_path(&self, session_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.full.jsonl", sanitize_session_id(session_id)))
    }
}

fn append_to(path: &Path, buf: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(Error::Io)?;
    file.write_all(buf.as_bytes()).map_err(Error::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let writer = TranscriptWriter::new(dir.path());

        writer
            .append(
                "s1",
                &[
                    TranscriptWriter::line("user", "hello"),
                    TranscriptWriter::line("assistant", "hi there"),
                ],
            )
            .unwrap();

        let lines = writer.read("s1").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].role, "user");
        assert_eq!(lines[1].content, "hi there");
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let writer = TranscriptWriter::new(dir.path());
        writer
            .append("s1", &[TranscriptWriter::line("user", "ok")])
            .unwrap();
        std::fs::write(
            writer.transcript_path("s1"),
            "{\"timestamp\":\"t\",\"role\":\"user\",\"content\":\"ok\"}\nnot-json\n",
        )
        .unwrap();

        let lines = writer.read("s1").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn event_log_is_separate() {
        let dir = TempDir::new().unwrap();
        let writer = TranscriptWriter::new(dir.path());
        writer
            .append_event("s1", &serde_json::json!({"type": "response.delta"}))
            .unwrap();
        assert!(writer.event_log_path("s1").exists());
        assert!(!writer.transcript_path("s1").exists());
    }
}
