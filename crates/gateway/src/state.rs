use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use drost_domain::config::Config;
use drost_providers::{FailoverState, ProbeResult, ProviderManager};
use drost_sessions::SessionFileStore;
use drost_tools::ToolRuntime;

use crate::api::auth::AuthState;
use crate::events::EventBroadcaster;
use crate::lifecycle::{DegradedReasons, GatewayState};
use crate::runtime::evolution::EvolutionCoordinator;
use crate::runtime::lanes::LaneScheduler;
use crate::runtime::restart::RestartCoordinator;
use crate::runtime::SessionManager;

/// Shared application state passed to all control-API handlers.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<SessionFileStore>,
    pub providers: Arc<ProviderManager>,
    pub failover: Arc<FailoverState>,
    pub tools: Arc<ToolRuntime>,

    // ── Orchestration ─────────────────────────────────────────────────
    pub manager: Arc<SessionManager>,
    pub lanes: Arc<LaneScheduler>,
    pub evolution: Arc<EvolutionCoordinator>,
    pub restart: Arc<RestartCoordinator>,

    // ── Observability & lifecycle ─────────────────────────────────────
    pub events: EventBroadcaster,
    pub degraded: Arc<DegradedReasons>,
    pub gateway_state: Arc<Mutex<GatewayState>>,
    pub started_at: DateTime<Utc>,
    /// Startup probe results (empty unless `failover.probe_on_start`).
    pub probes: Arc<Vec<(String, ProbeResult)>>,

    // ── Security (startup-computed) ───────────────────────────────────
    pub auth: Arc<AuthState>,
}
