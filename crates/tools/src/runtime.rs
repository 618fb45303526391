//! Tool dispatch: policy gate, schema validation, lifecycle events, and
//! redacted traces around every execution.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use drost_domain::config::{PolicyProfile, ToolPolicy};
use drost_domain::stream::TurnEvent;
use drost_domain::tool::{ToolDefinition, ToolOutcome};
use drost_domain::{Error, Result, ValidationIssue};

use crate::registry::ToolRegistry;
use crate::trace::TraceWriter;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait + context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace_dir: PathBuf,
    pub mutable_roots: Vec<PathBuf>,
    pub session_id: String,
    pub provider_id: Option<String>,
}

/// A registered tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Execute with already-validated input. Execution failures are normal
    /// results (`ok: false`), never panics or crate errors.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolOutcome;
}

/// Narrow view of the gateway given to the `agent` built-in so it can
/// report status and request restarts without a crate cycle.
#[async_trait::async_trait]
pub trait GatewayHandle: Send + Sync {
    fn status(&self) -> Value;
    async fn request_restart(&self, reason: &str) -> Result<Value>;
}

/// Callback receiving tool lifecycle events.
pub type EventSink<'a> = &'a (dyn Fn(TurnEvent) + Send + Sync);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolRuntime {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
    traces: Option<TraceWriter>,
    workspace_dir: PathBuf,
    mutable_roots: Vec<PathBuf>,
}

impl ToolRuntime {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policy: ToolPolicy,
        traces: Option<TraceWriter>,
        workspace_dir: PathBuf,
        mutable_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            registry,
            policy,
            traces,
            workspace_dir,
            mutable_roots,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Tool definitions visible under the current policy.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .definitions()
            .into_iter()
            .filter(|d| self.policy_check(&d.name).is_ok())
            .collect()
    }

    /// Whether a tool exists and the policy lets it run.
    pub fn available(&self, name: &str) -> bool {
        self.registry.get(name).is_some() && self.policy_check(name).is_ok()
    }

    /// Run one tool.
    ///
    /// `ToolNotFound`, `PolicyDenied` and `Validation` surface as typed
    /// errors; execution failures come back as `Ok(outcome)` with
    /// `ok: false`.
    pub async fn run_tool(
        &self,
        session_id: &str,
        name: &str,
        input: Value,
        provider_id: Option<&str>,
        on_event: Option<EventSink<'_>>,
    ) -> Result<ToolOutcome> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))?;

        if let Err(e) = self.policy_check(name) {
            if let Some(sink) = on_event {
                sink(TurnEvent::ToolPolicyDenied {
                    name: name.to_owned(),
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }

        if let Some(sink) = on_event {
            sink(TurnEvent::ToolCallStarted {
                name: name.to_owned(),
                call_id: None,
            });
        }

        let definition = tool.definition();
        self.validate_input(&definition, &input)?;

        let ctx = ToolContext {
            workspace_dir: self.workspace_dir.clone(),
            mutable_roots: self.mutable_roots.clone(),
            session_id: session_id.to_owned(),
            provider_id: provider_id.map(str::to_owned),
        };

        let start = Instant::now();
        let outcome = tool.execute(input.clone(), &ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Some(sink) = on_event {
            sink(TurnEvent::ToolCallCompleted {
                name: name.to_owned(),
                call_id: None,
                ok: outcome.ok,
                code: outcome.code.clone(),
                duration_ms,
                error: outcome.error.clone(),
            });
        }

        if let Some(traces) = &self.traces {
            traces.record(session_id, name, provider_id, &input, &outcome, duration_ms);
        }

        Ok(outcome)
    }

    // ── Policy ─────────────────────────────────────────────────────

    fn policy_check(&self, name: &str) -> Result<()> {
        if self.policy.denied_tools.iter().any(|d| d == name) {
            return Err(Error::PolicyDenied(format!("tool '{name}' is denied")));
        }
        if !self.policy.allowed_tools.is_empty()
            && !self.policy.allowed_tools.iter().any(|a| a == name)
        {
            return Err(Error::PolicyDenied(format!(
                "tool '{name}' is not in the allow list"
            )));
        }
        if self.policy.profile == PolicyProfile::Strict
            && matches!(name, "shell" | "web")
            && !self.policy.allowed_tools.iter().any(|a| a == name)
        {
            return Err(Error::PolicyDenied(format!(
                "tool '{name}' requires an explicit allow entry under the strict profile"
            )));
        }
        Ok(())
    }

    // ── Validation ─────────────────────────────────────────────────

    fn validate_input(&self, definition: &ToolDefinition, input: &Value) -> Result<()> {
        if definition.parameters.is_null() {
            return Ok(());
        }
        let validator = match jsonschema::validator_for(&definition.parameters) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    tool = %definition.name,
                    error = %e,
                    "tool schema does not compile, skipping validation"
                );
                return Ok(());
            }
        };

        let issues: Vec<ValidationIssue> = validator
            .iter_errors(input)
            .map(|err| ValidationIssue {
                path: err.instance_path.to_string(),
                message: err.to_string(),
                code: None,
            })
            .collect();

        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(
                format!("input for tool '{}' failed schema validation", definition.name),
                issues,
            ))
        }
    }
}
