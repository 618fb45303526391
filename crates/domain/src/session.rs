//! The canonical per-session record (v2) and its legacy v1 upgrade path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatMessage, Role};

/// Current on-disk record version.
pub const SESSION_RECORD_VERSION: u32 = 2;

/// Where a channel-originated session came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionOrigin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// How skill context is injected into provider prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillInjectionMode {
    Off,
    All,
    Relevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_route_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_injection_mode: Option<SkillInjectionMode>,
}

impl SessionMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_activity_at: now,
            title: None,
            origin: None,
            provider_route_id: None,
            skill_injection_mode: None,
        }
    }
}

/// Canonical session record v2 -- the unit of persistence.
///
/// Invariants: `last_activity_at >= created_at >= every message created_at`;
/// `revision` strictly increases with every persisted write;
/// `pending_provider_id` is consumed at the next turn boundary only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub version: u32,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_provider_id: Option<String>,
    pub history: Vec<ChatMessage>,
    pub metadata: SessionMetadata,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, provider_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            version: SESSION_RECORD_VERSION,
            session_id: session_id.into(),
            active_provider_id: provider_id,
            pending_provider_id: None,
            history: Vec::new(),
            metadata: SessionMetadata::new(now),
            revision: 0,
            updated_at: now,
        }
    }

    /// Text of the most recent user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn touch(&mut self) {
        self.metadata.last_activity_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Legacy v1
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// v1 records predate metadata and revisions. Accepted read-only; the next
/// save writes them back as v2.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySessionV1 {
    pub session_id: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub messages: Vec<LegacyMessageV1>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMessageV1 {
    pub role: Role,
    pub content: String,
}

impl LegacySessionV1 {
    pub fn upgrade(self) -> SessionRecord {
        let created = self.created_at.unwrap_or_else(Utc::now);
        let history: Vec<ChatMessage> = self
            .messages
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
                created_at: created,
                image_refs: None,
            })
            .collect();

        let mut metadata = SessionMetadata::new(created);
        metadata.last_activity_at = created;

        SessionRecord {
            version: SESSION_RECORD_VERSION,
            session_id: self.session_id,
            active_provider_id: self.provider,
            pending_provider_id: None,
            history,
            metadata,
            revision: 0,
            updated_at: created,
        }
    }
}
