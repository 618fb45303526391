//! Deterministic session ids for channel-originated sessions.
//!
//! The raw key concatenates the origin tuple; when it exceeds the length
//! cap it is replaced by a sha256 digest so the id stays filesystem-safe
//! and bounded while remaining deterministic.

use sha2::{Digest, Sha256};

/// The origin tuple a channel-derived session id is computed from.
#[derive(Debug, Clone, Default)]
pub struct SessionKeyParts {
    pub channel: String,
    pub workspace_id: Option<String>,
    pub account_id: Option<String>,
    pub chat_id: Option<String>,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Compute the session id for an origin tuple.
pub fn derive_session_id(parts: &SessionKeyParts, max_len: usize) -> String {
    let mut key = format!("chan:{}", segment(&parts.channel));
    for (label, value) in [
        ("ws", &parts.workspace_id),
        ("acct", &parts.account_id),
        ("chat", &parts.chat_id),
        ("user", &parts.user_id),
    ] {
        if let Some(v) = value {
            key.push_str(&format!(":{label}:{}", segment(v)));
        }
    }
    if let Some(tid) = &parts.thread_id {
        key.push_str(&format!(":thread:{}", segment(tid)));
    }

    if key.len() > max_len {
        let digest = Sha256::digest(key.as_bytes());
        format!("chan:{}:{}", segment(&parts.channel), &hex::encode(digest)[..32])
    } else {
        key
    }
}

/// Map a session id to a safe file stem: anything outside
/// `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_session_id(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".into()
    } else {
        sanitized
    }
}

fn segment(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "default".into()
    } else {
        trimmed.replace(':', "_")
    }
}
