//! OpenAI-compatible adapter.
//!
//! Works with any endpoint following the chat-completions contract:
//! OpenAI, Ollama, vLLM, LM Studio, Together, and most gateways.

use std::collections::BTreeMap;

use serde_json::Value;

use drost_domain::capability::ProviderFamily;
use drost_domain::config::{ProviderProfile, WireQuirks};
use drost_domain::message::{ChatMessage, Role};
use drost_domain::stream::{BoxStream, StreamEvent, Usage};
use drost_domain::tool::ToolDefinition;
use drost_domain::{Error, Result};

use crate::failover::error_for_status;
use crate::sse::event_stream;
use crate::traits::{ProbeCode, ProbeResult, ProviderAdapter, TurnRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatAdapter {
    id: String,
    base_url: Option<String>,
    api_key: Option<String>,
    auth_env: Option<String>,
    model: String,
    family: ProviderFamily,
    quirks: WireQuirks,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// Build from a profile. The API key env var named by
    /// `auth_profile_id` is read once, here.
    pub fn from_profile(profile: &ProviderProfile) -> Result<Self> {
        let api_key = profile
            .auth_profile_id
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .filter(|k| !k.is_empty());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::ProviderTransport {
                provider: profile.id.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            id: profile.id.clone(),
            base_url: profile
                .base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_owned()),
            api_key,
            auth_env: profile.auth_profile_id.clone(),
            model: profile.model.clone(),
            family: profile.family,
            quirks: profile.wire_quirks.unwrap_or_default(),
            client,
        })
    }

    fn chat_url(&self) -> Result<String> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            Error::Config(format!("provider '{}' has no base_url", self.id))
        })?;
        Ok(format!("{base}/chat/completions"))
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_body(&self, req: &TurnRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| message_to_wire(m, &self.quirks))
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.model.clone()),
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_wire(role: Role, quirks: &WireQuirks) -> &'static str {
    match role {
        Role::System if quirks.system_as_user => "user",
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        // History stores tool traffic as envelope text, not as wire-level
        // tool messages; replay it as user content the model can read.
        Role::Tool => "user",
    }
}

fn message_to_wire(msg: &ChatMessage, quirks: &WireQuirks) -> Value {
    serde_json::json!({
        "role": role_to_wire(msg.role, quirks),
        "content": msg.content,
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Streaming tool calls arrive as fragments keyed by choice index; this
/// assembles them and emits complete [`StreamEvent::ToolCall`]s at
/// end-of-stream.
#[derive(Default)]
struct ToolCallAssembly {
    // index -> (id, name, accumulated argument json)
    partial: BTreeMap<u64, (Option<String>, String, String)>,
}

impl ToolCallAssembly {
    fn absorb(&mut self, tc: &Value) {
        let idx = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
        let entry = self
            .partial
            .entry(idx)
            .or_insert_with(|| (None, String::new(), String::new()));

        if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
            entry.0 = Some(id.to_owned());
        }
        if let Some(name) = tc
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|v| v.as_str())
        {
            entry.1.push_str(name);
        }
        if let Some(args) = tc
            .get("function")
            .and_then(|f| f.get("arguments"))
            .and_then(|v| v.as_str())
        {
            entry.2.push_str(args);
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for (_, (id, name, args)) in std::mem::take(&mut self.partial) {
            if name.is_empty() {
                continue;
            }
            let input = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
                    Value::Object(Default::default())
                })
            };
            events.push(StreamEvent::ToolCall { id, name, input });
        }
        events
    }
}

/// Parse one SSE payload into stream events.
fn parse_payload(data: &str, assembly: &mut ToolCallAssembly) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        let mut events: Vec<Result<StreamEvent>> =
            assembly.finish().into_iter().map(Ok).collect();
        events.push(Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        }));
        return events;
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    let Some(choice) = choice else {
        // Usage-only chunk (stream_options.include_usage).
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })];
        }
        return Vec::new();
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let mut events: Vec<Result<StreamEvent>> =
            assembly.finish().into_iter().map(Ok).collect();
        events.push(Ok(StreamEvent::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(fr.to_owned()),
        }));
        return events;
    }

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            assembly.absorb(tc);
        }
        return Vec::new();
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return vec![Ok(StreamEvent::Delta {
                text: text.to_owned(),
            })];
        }
    }

    Vec::new()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports_native_tool_calls(&self) -> Option<bool> {
        // Native calls need a family with a known tool wire format.
        match self.family {
            ProviderFamily::Openai | ProviderFamily::Anthropic => Some(true),
            _ => None,
        }
    }

    async fn probe(&self) -> ProbeResult {
        let Some(base) = self.base_url.as_deref() else {
            return ProbeResult::failed(ProbeCode::MissingProfile, "no base_url configured");
        };
        if self.auth_env.is_some() && self.api_key.is_none() {
            return ProbeResult::failed(
                ProbeCode::MissingAuth,
                format!(
                    "auth env var '{}' is unset or empty",
                    self.auth_env.as_deref().unwrap_or_default()
                ),
            );
        }

        let url = format!("{base}/models");
        let mut builder = self.client.get(&url).timeout(std::time::Duration::from_secs(5));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        match builder.send().await {
            Ok(resp) if resp.status().is_success() => ProbeResult::ok(),
            Ok(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
                ProbeResult::failed(ProbeCode::MissingAuth, format!("HTTP {}", resp.status()))
            }
            Ok(resp) => {
                ProbeResult::failed(ProbeCode::ProviderError, format!("HTTP {}", resp.status()))
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                ProbeResult::failed(ProbeCode::Unreachable, e.to_string())
            }
            Err(e) => ProbeResult::failed(ProbeCode::IncompatibleTransport, e.to_string()),
        }
    }

    async fn run_turn(
        &self,
        req: &TurnRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.chat_url()?;
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %url, "chat-completions stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ProviderTimeout {
                        provider: self.id.clone(),
                        elapsed_ms: 120_000,
                    }
                } else {
                    Error::ProviderTransport {
                        provider: self.id.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(error_for_status(&self.id, status.as_u16(), &body_text));
        }

        let mut assembly = ToolCallAssembly::default();
        Ok(event_stream(resp, self.id.clone(), move |data| {
            parse_payload(data, &mut assembly)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_parsed() {
        let mut assembly = ToolCallAssembly::default();
        let events = parse_payload(
            r#"{"choices":[{"delta":{"content":"hel"}}]}"#,
            &mut assembly,
        );
        assert!(matches!(
            events.first(),
            Some(Ok(StreamEvent::Delta { text })) if text == "hel"
        ));
    }

    #[test]
    fn tool_call_fragments_assemble() {
        let mut assembly = ToolCallAssembly::default();

        assert!(parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"web"}}]}}]}"#,
            &mut assembly,
        )
        .is_empty());
        assert!(parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"action\":"}}]}}]}"#,
            &mut assembly,
        )
        .is_empty());
        assert!(parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"search\"}"}}]}}]}"#,
            &mut assembly,
        )
        .is_empty());

        let events = parse_payload(
            r#"{"choices":[{"finish_reason":"tool_calls"}]}"#,
            &mut assembly,
        );
        assert_eq!(events.len(), 2);
        match &events[0] {
            Ok(StreamEvent::ToolCall { id, name, input }) => {
                assert_eq!(id.as_deref(), Some("c1"));
                assert_eq!(name, "web");
                assert_eq!(input["action"], "search");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(matches!(events[1], Ok(StreamEvent::Done { .. })));
    }

    #[test]
    fn usage_only_chunk_yields_done() {
        let mut assembly = ToolCallAssembly::default();
        let events = parse_payload(
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":3,"total_tokens":8}}"#,
            &mut assembly,
        );
        assert!(matches!(
            events.first(),
            Some(Ok(StreamEvent::Done { usage: Some(u), .. })) if u.total_tokens == 8
        ));
    }

    #[test]
    fn done_sentinel_flushes_assembly() {
        let mut assembly = ToolCallAssembly::default();
        parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c9","function":{"name":"file","arguments":"{}"}}]}}]}"#,
            &mut assembly,
        );
        let events = parse_payload("[DONE]", &mut assembly);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::ToolCall { .. })));
    }

    #[test]
    fn tool_role_replayed_as_user() {
        let quirks = WireQuirks::default();
        let msg = ChatMessage::tool("TOOL_RESULT {\"ok\":true}");
        let wire = message_to_wire(&msg, &quirks);
        assert_eq!(wire["role"], "user");
    }
}
