use serde::{Deserialize, Serialize};

/// A tool invocation requested by the model (native or text-protocol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, when the wire format carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub input: serde_json::Value,
}

/// Tool definition exposed to providers and validated against on dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub parameters: serde_json::Value,
}

/// Structured result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ToolOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            ok: true,
            output: Some(output),
            error: None,
            code: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: None,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_shapes() {
        let ok = ToolOutcome::success(serde_json::json!({"echoed": true}));
        assert!(ok.ok);
        assert!(ok.error.is_none());

        let fail = ToolOutcome::failure("stale_revision", "HEAD moved");
        assert!(!fail.ok);
        assert_eq!(fail.code.as_deref(), Some("stale_revision"));
    }

    #[test]
    fn tool_call_omits_absent_id() {
        let call = ToolCall {
            id: None,
            name: "file".into(),
            input: serde_json::json!({"action": "list"}),
        };
        let json = serde_json::to_value(&call).unwrap();
        assert!(json.get("id").is_none());
    }
}
