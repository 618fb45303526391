use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for provider streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Token usage reported by a provider for one adapter invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Events emitted by a provider adapter while streaming one invocation.
///
/// Adapters translate their native wire format into this; the turn loop is
/// the only consumer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// A text chunk. Some providers emit diffs, some cumulative snapshots;
    /// the turn loop dedupes the latter at finalization.
    #[serde(rename = "delta")]
    Delta { text: String },

    /// A complete native tool call.
    #[serde(rename = "tool_call")]
    ToolCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        input: serde_json::Value,
    },

    /// The invocation finished.
    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },

    /// A mid-stream provider failure.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Events delivered to the turn submitter, in adapter-emitted order.
///
/// The serde tags are the wire names on the `/events` stream; consumers may
/// discard or present any of them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnEvent {
    #[serde(rename = "response.delta")]
    ResponseDelta { text: String },

    #[serde(rename = "response.completed")]
    ResponseCompleted { text: String },

    #[serde(rename = "usage.updated")]
    UsageUpdated { usage: Usage },

    #[serde(rename = "tool.call.started")]
    ToolCallStarted {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },

    #[serde(rename = "tool.call.completed")]
    ToolCallCompleted {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "tool.policy.denied")]
    ToolPolicyDenied { name: String, reason: String },

    #[serde(rename = "provider.error")]
    ProviderError {
        provider_id: String,
        message: String,
    },
}
