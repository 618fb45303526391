//! Text-mode tool-call protocol.
//!
//! A small tokenizer, not a regex pile: scan for the literal `TOOL_CALL`
//! token, then parse the JSON between matched braces. Also builds the
//! `TOOL_RESULT` and `TOOL_NATIVE_CALLS` envelopes recorded in history.

use serde_json::Value;

use drost_domain::tool::{ToolCall, ToolOutcome};

pub const TOOL_CALL_TOKEN: &str = "TOOL_CALL";
pub const TOOL_RESULT_TOKEN: &str = "TOOL_RESULT";
pub const TOOL_NATIVE_CALLS_TOKEN: &str = "TOOL_NATIVE_CALLS";

/// A parsed text-mode directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDirective {
    pub name: String,
    pub input: Value,
}

/// Find the first `TOOL_CALL {json}` directive in assistant text.
///
/// The token may appear bare, prefixed by other text on the line, or
/// inside a Markdown fenced JSON block. The first token followed by
/// parseable JSON wins.
pub fn extract_directive(text: &str) -> Option<ToolCallDirective> {
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(TOOL_CALL_TOKEN) {
        let token_at = search_from + rel;
        let after = token_at + TOOL_CALL_TOKEN.len();

        if let Some(json_start) = text[after..].find('{').map(|i| after + i) {
            // Only whitespace may sit between the token and the JSON.
            if text[after..json_start].trim().is_empty() {
                if let Some(raw) = balanced_json(&text[json_start..]) {
                    if let Ok(value) = serde_json::from_str::<Value>(raw) {
                        let name = value.get("name").and_then(|n| n.as_str());
                        if let Some(name) = name {
                            if !name.is_empty() {
                                return Some(ToolCallDirective {
                                    name: name.to_owned(),
                                    input: value.get("input").cloned().unwrap_or(Value::Null),
                                });
                            }
                        }
                    }
                }
            }
        }
        search_from = after;
    }
    None
}

/// The longest balanced `{...}` prefix of `text`, honoring JSON strings
/// and escapes.
fn balanced_json(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `TOOL_RESULT <minified-json>` recorded after each execution.
pub fn tool_result_envelope(name: &str, call_id: Option<&str>, outcome: &ToolOutcome) -> String {
    let mut body = serde_json::json!({
        "name": name,
        "ok": outcome.ok,
    });
    if let Some(id) = call_id {
        body["callId"] = Value::String(id.to_owned());
    }
    if let Some(output) = &outcome.output {
        body["output"] = output.clone();
    }
    if let Some(error) = &outcome.error {
        body["error"] = Value::String(error.clone());
    }
    format!("{TOOL_RESULT_TOKEN} {body}")
}

/// `TOOL_NATIVE_CALLS <minified-json-array>` recording a native call list.
pub fn native_calls_envelope(calls: &[ToolCall]) -> String {
    let entries: Vec<Value> = calls
        .iter()
        .map(|c| {
            let mut entry = serde_json::json!({
                "name": c.name,
                "input": c.input,
            });
            if let Some(id) = &c.id {
                entry["id"] = Value::String(id.clone());
            }
            entry
        })
        .collect();
    format!(
        "{TOOL_NATIVE_CALLS_TOKEN} {}",
        Value::Array(entries)
    )
}

/// The synthesized system message documenting the line protocol.
pub fn text_mode_system_prompt(tool_names: &[String]) -> String {
    format!(
        "You can call tools. Available tools: {}.\n\
         To call a tool, reply with a single line:\n\
         TOOL_CALL {{\"name\":\"<tool>\",\"input\":<json>}}\n\
         The result will be returned as a TOOL_RESULT message. \
         When you have everything you need, reply normally.",
        tool_names.join(", ")
    )
}
