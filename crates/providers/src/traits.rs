use serde::Serialize;

use drost_domain::message::ChatMessage;
use drost_domain::stream::{BoxStream, StreamEvent};
use drost_domain::tool::ToolDefinition;
use drost_domain::Result;

use crate::cancel::CancelToken;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One adapter invocation within a turn.
#[derive(Clone, Default)]
pub struct TurnRequest {
    /// The conversation to send, already in final order.
    pub messages: Vec<ChatMessage>,
    /// Tool schemas, sent only in native tool mode.
    pub tools: Vec<ToolDefinition>,
    /// Model override; `None` uses the profile's model.
    pub model: Option<String>,
    /// Abort signal. Adapters must stop streaming promptly once set.
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Probe outcome classes. Only `Ok` counts as healthy; everything else is
/// surfaced as a startup degradation reason but does not prevent starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCode {
    Ok,
    MissingProfile,
    MissingAuth,
    IncompatibleTransport,
    Unreachable,
    ProviderError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub code: ProbeCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn ok() -> Self {
        Self {
            code: ProbeCode::Ok,
            detail: None,
        }
    }

    pub fn failed(code: ProbeCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }

    pub fn healthy(&self) -> bool {
        self.code == ProbeCode::Ok
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every provider adapter implements.
///
/// An adapter translates a generic [`TurnRequest`] to and from one
/// provider's native wire format and streams back [`StreamEvent`]s.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique id of this adapter instance (the profile id).
    fn id(&self) -> &str;

    /// Adapter-level claim about native tool-call support. `None` defers
    /// to the family defaults and profile hints.
    fn supports_native_tool_calls(&self) -> Option<bool> {
        None
    }

    /// Cheap health check used at startup and on demand.
    async fn probe(&self) -> ProbeResult;

    /// Run one invocation, streaming events until `Done`.
    async fn run_turn(&self, req: &TurnRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;
}
