//! Gateway lifecycle: `stopped → starting → running ∨ degraded →
//! stopping → stopped`.
//!
//! Each start step tolerates its recoverable failures by appending a
//! reason to the degraded list; only directory and store creation are
//! fatal. The gateway serves traffic in the degraded state.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use drost_domain::config::Config;
use drost_providers::{FailoverState, ProbeResult, ProviderManager};
use drost_sessions::{LockOptions, SessionFileStore, TranscriptWriter};
use drost_tools::trace::TraceWriter;
use drost_tools::{build_registry, GatewayHandle, ToolRuntime};

use crate::events::EventBroadcaster;
use crate::runtime::evolution::EvolutionCoordinator;
use crate::runtime::lanes::LaneScheduler;
use crate::runtime::restart::{RestartCoordinator, RestartIntent};
use crate::runtime::SessionManager;
use crate::state::AppState;

pub const LANE_SNAPSHOT_FILE: &str = "orchestration-lanes.json";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State + degraded reasons
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
}

/// Process-wide append-only degradation notes. Never cleared except by a
/// fresh start.
#[derive(Default)]
pub struct DegradedReasons {
    reasons: Mutex<Vec<String>>,
}

impl DegradedReasons {
    pub fn push(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "gateway degraded");
        self.reasons.lock().push(reason);
    }

    pub fn list(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent-tool handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The narrow gateway view handed to the `agent` built-in tool.
struct GatewayControl {
    state: Arc<Mutex<GatewayState>>,
    degraded: Arc<DegradedReasons>,
    restart: Arc<RestartCoordinator>,
    started_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl GatewayHandle for GatewayControl {
    fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "state": *self.state.lock(),
            "degradedReasons": self.degraded.list(),
            "startedAt": self.started_at.to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    async fn request_restart(&self, reason: &str) -> drost_domain::Result<serde_json::Value> {
        self.restart.request(RestartIntent::SelfMod, reason, false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Start sequence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start(config: Arc<Config>) -> anyhow::Result<AppState> {
    let started_at = Utc::now();
    let gateway_state = Arc::new(Mutex::new(GatewayState::Starting));
    let degraded = Arc::new(DegradedReasons::default());

    // ── Directories (fatal) ──────────────────────────────────────────
    std::fs::create_dir_all(&config.workspace.state_dir)
        .with_context(|| format!("creating state dir {:?}", config.workspace.state_dir))?;
    std::fs::create_dir_all(&config.workspace.workspace_dir)
        .with_context(|| format!("creating workspace dir {:?}", config.workspace.workspace_dir))?;

    // ── Session store (fatal) ────────────────────────────────────────
    let sessions_dir = config.workspace.state_dir.join("sessions");
    let store = Arc::new(
        SessionFileStore::open(
            &sessions_dir,
            LockOptions {
                timeout_ms: config.sessions.lock_timeout_ms,
                stale_ms: config.sessions.lock_stale_ms,
            },
            config.sessions.history_budget.clone(),
        )
        .context("opening session store")?,
    );
    let transcripts = Arc::new(TranscriptWriter::new(&sessions_dir));

    // ── Restart history ──────────────────────────────────────────────
    let restart = Arc::new(RestartCoordinator::new(
        config.restart.clone(),
        Some(&config.workspace.state_dir),
    ));
    tracing::info!(
        attempts_in_window = restart.attempts_in_window(),
        "restart history loaded"
    );

    // ── Tool registry + runtime ──────────────────────────────────────
    let gateway_handle: Arc<dyn GatewayHandle> = Arc::new(GatewayControl {
        state: gateway_state.clone(),
        degraded: degraded.clone(),
        restart: restart.clone(),
        started_at,
    });
    let registry = build_registry(&config.tools, Some(gateway_handle));
    for diagnostic in registry.diagnostics() {
        degraded.push(format!("tool registry: {diagnostic}"));
    }
    let traces = config
        .tools
        .traces
        .then(|| TraceWriter::new(&config.workspace.state_dir));
    let tools = Arc::new(ToolRuntime::new(
        Arc::new(registry),
        config.tools.policy.clone(),
        traces,
        config.workspace.workspace_dir.clone(),
        config.workspace.effective_mutable_roots(),
    ));

    // ── Providers ────────────────────────────────────────────────────
    let providers = Arc::new(ProviderManager::from_profiles(&config.providers));
    for init_error in providers.init_errors() {
        degraded.push(format!(
            "provider '{}' failed to initialize: {}",
            init_error.provider_id, init_error.error
        ));
    }
    if providers.is_empty() {
        degraded.push("no providers initialized; turns will fail until configured".to_owned());
    }

    let mut probes: Vec<(String, ProbeResult)> = Vec::new();
    if config.failover.probe_on_start {
        probes = providers.probe_all().await;
        for (provider_id, result) in &probes {
            if !result.healthy() {
                degraded.push(format!(
                    "startup probe for '{provider_id}': {:?}{}",
                    result.code,
                    result
                        .detail
                        .as_deref()
                        .map(|d| format!(" ({d})"))
                        .unwrap_or_default()
                ));
            }
        }
    }

    let failover = Arc::new(FailoverState::new(config.failover.clone()));

    // ── Session manager + lanes ──────────────────────────────────────
    let events = EventBroadcaster::new();
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        transcripts,
        providers.clone(),
        failover.clone(),
        tools.clone(),
        config.routes.clone(),
        config.tools.max_tool_calls_per_turn,
        degraded.clone(),
    ));

    let snapshot_path = config
        .orchestration
        .persist_lanes
        .then(|| config.workspace.state_dir.join(LANE_SNAPSHOT_FILE));
    let lanes = LaneScheduler::new(
        manager.clone(),
        config.orchestration.clone(),
        events.clone(),
        snapshot_path,
    );
    match lanes.restore_from_disk() {
        Ok(0) => {}
        Ok(count) => tracing::info!(lanes = count, "restored orchestration lanes"),
        Err(e) => degraded.push(format!("lane snapshot restore failed: {e}")),
    }

    let evolution = Arc::new(EvolutionCoordinator::new(tools.clone(), restart.clone()));

    // ── Final state ──────────────────────────────────────────────────
    *gateway_state.lock() = if degraded.is_empty() {
        GatewayState::Running
    } else {
        GatewayState::Degraded
    };
    tracing::info!(state = ?*gateway_state.lock(), "gateway started");
    events.publish(serde_json::json!({
        "type": "gateway.started",
        "state": *gateway_state.lock(),
        "degradedReasons": degraded.list(),
    }));

    let auth = Arc::new(crate::api::auth::AuthState::from_config(&config.server));

    Ok(AppState {
        config,
        store,
        providers,
        failover,
        tools,
        manager,
        lanes,
        evolution,
        restart,
        events,
        degraded,
        gateway_state,
        started_at,
        probes: Arc::new(probes),
        auth,
    })
}

/// Graceful stop: reject queued work, abort active turns, mark stopped.
pub fn stop(state: &AppState) {
    *state.gateway_state.lock() = GatewayState::Stopping;
    state.events.publish(serde_json::json!({ "type": "gateway.stopping" }));
    state.lanes.stop();
    *state.gateway_state.lock() = GatewayState::Stopped;
    tracing::info!("gateway stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Arc<Config> {
        let mut config = Config::default();
        config.workspace.state_dir = dir.path().join("state");
        config.workspace.workspace_dir = dir.path().join("workspace");
        config
            .providers
            .push(drost_domain::config::ProviderProfile::named("mock-main"));
        Arc::new(config)
    }

    #[tokio::test]
    async fn start_reaches_running_with_healthy_config() {
        let dir = TempDir::new().unwrap();
        let state = start(test_config(&dir)).await.unwrap();
        assert_eq!(*state.gateway_state.lock(), GatewayState::Running);
        assert!(state.degraded.is_empty());
        assert!(dir.path().join("state/sessions").exists());
    }

    #[tokio::test]
    async fn provider_less_config_degrades_but_starts() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspace.state_dir = dir.path().join("state");
        config.workspace.workspace_dir = dir.path().join("workspace");

        let state = start(Arc::new(config)).await.unwrap();
        assert_eq!(*state.gateway_state.lock(), GatewayState::Degraded);
        assert!(state
            .degraded
            .list()
            .iter()
            .any(|r| r.contains("no providers")));
    }

    #[tokio::test]
    async fn stop_transitions_to_stopped() {
        let dir = TempDir::new().unwrap();
        let state = start(test_config(&dir)).await.unwrap();
        stop(&state);
        assert_eq!(*state.gateway_state.lock(), GatewayState::Stopped);
    }
}
