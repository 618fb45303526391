//! Deterministic scripted adapter.
//!
//! Serves `kind = "mock"` profiles and every offline test. Each call to
//! `run_turn` pops the next script; tests specify exact event sequences --
//! including native tool calls and failures -- without network access.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use drost_domain::stream::{BoxStream, StreamEvent, Usage};
use drost_domain::{Error, Result};

use crate::traits::{ProbeResult, ProviderAdapter, TurnRequest};

/// One scripted adapter invocation.
#[derive(Clone)]
pub enum MockTurn {
    /// Emit these events in order.
    Events(Vec<StreamEvent>),
    /// Fail the invocation before streaming. `retryable` selects the
    /// transport vs auth error class.
    Fail { message: String, retryable: bool },
}

impl MockTurn {
    /// A plain text reply with token usage.
    pub fn text(reply: impl Into<String>) -> Self {
        MockTurn::Events(vec![
            StreamEvent::Delta { text: reply.into() },
            StreamEvent::Done {
                usage: Some(Usage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    total_tokens: 10,
                }),
                finish_reason: Some("stop".into()),
            },
        ])
    }

    /// A native tool call followed by end-of-stream.
    pub fn native_tool_call(name: impl Into<String>, input: serde_json::Value) -> Self {
        MockTurn::Events(vec![
            StreamEvent::ToolCall {
                id: Some("call-1".into()),
                name: name.into(),
                input,
            },
            StreamEvent::Done {
                usage: None,
                finish_reason: Some("tool_calls".into()),
            },
        ])
    }
}

pub struct ScriptedAdapter {
    id: String,
    scripts: Mutex<VecDeque<MockTurn>>,
    native_override: Option<bool>,
    /// Requests seen, newest last; tests inspect what was sent.
    pub requests: Arc<Mutex<Vec<TurnRequest>>>,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>, scripts: Vec<MockTurn>) -> Self {
        Self {
            id: id.into(),
            scripts: Mutex::new(scripts.into()),
            native_override: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: always reply with the same text.
    pub fn always_text(id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::new(id, vec![MockTurn::text(reply)])
    }

    /// Claim (or deny) native tool-call support.
    pub fn with_native_tool_calls(mut self, supported: bool) -> Self {
        self.native_override = Some(supported);
        self
    }

    fn next_script(&self) -> MockTurn {
        self.scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockTurn::text("[mock: script exhausted]"))
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_native_tool_calls(&self) -> Option<bool> {
        self.native_override
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::ok()
    }

    async fn run_turn(
        &self,
        req: &TurnRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());

        match self.next_script() {
            MockTurn::Events(events) => {
                let items: Vec<Result<StreamEvent>> = events.into_iter().map(Ok).collect();
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            MockTurn::Fail { message, retryable } => {
                if retryable {
                    Err(Error::ProviderTransport {
                        provider: self.id.clone(),
                        message,
                    })
                } else {
                    Err(Error::ProviderAuth {
                        provider: self.id.clone(),
                        message,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let adapter = ScriptedAdapter::new(
            "mock",
            vec![MockTurn::text("first"), MockTurn::text("second")],
        );

        for expected in ["first", "second"] {
            let mut stream = adapter.run_turn(&TurnRequest::default()).await.unwrap();
            let mut text = String::new();
            while let Some(Ok(event)) = stream.next().await {
                if let StreamEvent::Delta { text: t } = event {
                    text.push_str(&t);
                }
            }
            assert_eq!(text, expected);
        }
    }

    #[tokio::test]
    async fn failure_script_errors() {
        let adapter = ScriptedAdapter::new(
            "mock",
            vec![MockTurn::Fail {
                message: "HTTP 503".into(),
                retryable: true,
            }],
        );
        let err = adapter.run_turn(&TurnRequest::default()).await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back_to_placeholder() {
        let adapter = ScriptedAdapter::new("mock", vec![]);
        let mut stream = adapter.run_turn(&TurnRequest::default()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Delta { ref text } if text.contains("exhausted")));
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let adapter = ScriptedAdapter::always_text("mock", "ok");
        let req = TurnRequest {
            model: Some("m1".into()),
            ..Default::default()
        };
        let _ = adapter.run_turn(&req).await.unwrap();
        assert_eq!(adapter.requests.lock()[0].model.as_deref(), Some("m1"));
    }
}
