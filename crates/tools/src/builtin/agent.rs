//! `agent` tool -- gateway status and restart requests.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use drost_domain::tool::{ToolDefinition, ToolOutcome};

use crate::runtime::{GatewayHandle, Tool, ToolContext};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
enum AgentRequest {
    Status,
    Restart {
        #[serde(default)]
        reason: Option<String>,
    },
}

pub struct AgentTool {
    handle: Arc<dyn GatewayHandle>,
}

impl AgentTool {
    pub fn new(handle: Arc<dyn GatewayHandle>) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl Tool for AgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent".into(),
            description: "Inspect gateway status or request a gateway restart.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["status", "restart"] },
                    "reason": { "type": "string" }
                },
                "required": ["action"]
            }),
        }
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolOutcome {
        let request: AgentRequest = match serde_json::from_value(input) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::failure("bad_input", e.to_string()),
        };

        match request {
            AgentRequest::Status => ToolOutcome::success(self.handle.status()),
            AgentRequest::Restart { reason } => {
                let reason = reason.unwrap_or_else(|| "requested by agent tool".into());
                match self.handle.request_restart(&reason).await {
                    Ok(result) => ToolOutcome::success(result),
                    Err(e) => ToolOutcome::failure(e.code(), e.to_string()),
                }
            }
        }
    }
}
