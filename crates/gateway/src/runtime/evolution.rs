//! Evolution transactions: a recorded multi-step sequence of tool
//! invocations mutating code inside the mutable roots, optionally followed
//! by a restart request.
//!
//! At most one transaction is active per gateway process; concurrent
//! requests get `busy`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use drost_domain::{Error, Result};
use drost_tools::ToolRuntime;

use super::restart::{RestartCoordinator, RestartIntent};

#[derive(Debug, Clone, Deserialize)]
pub struct EvolutionStep {
    pub tool: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionTransaction {
    pub transaction_id: String,
    pub session_id: String,
    pub total_steps: usize,
    pub completed_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

pub struct EvolutionCoordinator {
    tools: Arc<ToolRuntime>,
    restart: Arc<RestartCoordinator>,
    active: Mutex<Option<EvolutionTransaction>>,
}

impl EvolutionCoordinator {
    pub fn new(tools: Arc<ToolRuntime>, restart: Arc<RestartCoordinator>) -> Self {
        Self {
            tools,
            restart,
            active: Mutex::new(None),
        }
    }

    /// The currently running transaction, if any.
    pub fn active(&self) -> Option<EvolutionTransaction> {
        self.active.lock().clone()
    }

    /// Run a transaction to completion.
    ///
    /// Steps execute sequentially through the tool runtime, so each one is
    /// policy-checked, validated, sandboxed, and traced like any other
    /// tool call. The first failing step stops the transaction.
    pub async fn run(
        &self,
        session_id: &str,
        steps: Vec<EvolutionStep>,
        summary: Option<String>,
        restart_after: bool,
    ) -> Result<Value> {
        if steps.is_empty() {
            return Err(Error::validation("evolution requires at least one step", vec![]));
        }

        let transaction = EvolutionTransaction {
            transaction_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            total_steps: steps.len(),
            completed_steps: 0,
            summary: summary.clone(),
        };

        {
            let mut active = self.active.lock();
            if let Some(current) = active.as_ref() {
                return Err(Error::Conflict(format!(
                    "busy: evolution transaction {} is active",
                    current.transaction_id
                )));
            }
            *active = Some(transaction.clone());
        }

        let result = self.run_steps(&transaction, steps).await;
        *self.active.lock() = None;

        let (completed, failure) = result;
        let mut body = serde_json::json!({
            "transactionId": transaction.transaction_id,
            "sessionId": session_id,
            "totalSteps": transaction.total_steps,
            "completedSteps": completed,
            "summary": summary,
        });

        if let Some((step_index, error)) = failure {
            body["ok"] = Value::Bool(false);
            body["failedStep"] = serde_json::json!(step_index);
            body["error"] = Value::String(error);
            return Ok(body);
        }
        body["ok"] = Value::Bool(true);

        if restart_after {
            let reason = summary.unwrap_or_else(|| "evolution transaction applied".into());
            match self.restart.request(RestartIntent::SelfMod, &reason, false) {
                Ok(restart) => body["restart"] = restart,
                Err(e) => {
                    body["restart"] = serde_json::json!({
                        "accepted": false,
                        "error": e.to_string(),
                    });
                }
            }
        }

        Ok(body)
    }

    async fn run_steps(
        &self,
        transaction: &EvolutionTransaction,
        steps: Vec<EvolutionStep>,
    ) -> (usize, Option<(usize, String)>) {
        let mut completed = 0;
        for (index, step) in steps.into_iter().enumerate() {
            tracing::info!(
                transaction_id = %transaction.transaction_id,
                step = index,
                tool = %step.tool,
                "evolution step"
            );

            let outcome = self
                .tools
                .run_tool(&transaction.session_id, &step.tool, step.input, None, None)
                .await;

            match outcome {
                Ok(result) if result.ok => {
                    completed += 1;
                    if let Some(active) = self.active.lock().as_mut() {
                        active.completed_steps = completed;
                    }
                }
                Ok(result) => {
                    let message = result
                        .error
                        .unwrap_or_else(|| "tool reported failure".into());
                    return (completed, Some((index, message)));
                }
                Err(e) => return (completed, Some((index, e.to_string()))),
            }
        }
        (completed, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drost_domain::config::{RestartConfig, ToolsConfig};
    use drost_tools::build_registry;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> EvolutionCoordinator {
        let registry = Arc::new(build_registry(&ToolsConfig::default(), None));
        let tools = Arc::new(ToolRuntime::new(
            registry,
            Default::default(),
            None,
            dir.path().to_path_buf(),
            vec![dir.path().to_path_buf()],
        ));
        let restart = Arc::new(RestartCoordinator::new(RestartConfig::default(), None));
        EvolutionCoordinator::new(tools, restart)
    }

    fn write_step(path: &str, content: &str) -> EvolutionStep {
        EvolutionStep {
            tool: "file".into(),
            input: serde_json::json!({"action": "write", "path": path, "content": content}),
        }
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);

        let result = coordinator
            .run(
                "s1",
                vec![
                    write_step("a.txt", "first"),
                    write_step("b.txt", "second"),
                ],
                Some("two writes".into()),
                false,
            )
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(result["completedSteps"], 2);
        assert!(dir.path().join("a.txt").exists());
        assert!(dir.path().join("b.txt").exists());
        assert!(coordinator.active().is_none());
    }

    #[tokio::test]
    async fn failing_step_stops_transaction() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);

        let result = coordinator
            .run(
                "s1",
                vec![
                    write_step("ok.txt", "fine"),
                    EvolutionStep {
                        tool: "file".into(),
                        input: serde_json::json!({
                            "action": "write", "path": "../escape.txt", "content": "nope"
                        }),
                    },
                    write_step("never.txt", "unreached"),
                ],
                None,
                false,
            )
            .await
            .unwrap();

        assert_eq!(result["ok"], false);
        assert_eq!(result["completedSteps"], 1);
        assert_eq!(result["failedStep"], 1);
        assert!(!dir.path().join("never.txt").exists());
    }

    #[tokio::test]
    async fn concurrent_transaction_is_busy() {
        let dir = TempDir::new().unwrap();
        let coordinator = Arc::new(coordinator(&dir));

        // Occupy the slot manually to simulate an in-flight transaction.
        *coordinator.active.lock() = Some(EvolutionTransaction {
            transaction_id: "t-1".into(),
            session_id: "other".into(),
            total_steps: 3,
            completed_steps: 1,
            summary: None,
        });

        let err = coordinator
            .run("s1", vec![write_step("x.txt", "y")], None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn empty_transaction_rejected() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let err = coordinator.run("s1", vec![], None, false).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
