//! Read routes: gateway status, providers, lanes.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /control/v1/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let session_count = state.store.list().map(|s| s.len()).unwrap_or(0);
    let probes: Vec<serde_json::Value> = state
        .probes
        .iter()
        .map(|(id, result)| {
            serde_json::json!({
                "providerId": id,
                "probe": result,
            })
        })
        .collect();

    Json(serde_json::json!({
        "state": *state.gateway_state.lock(),
        "degradedReasons": state.degraded.list(),
        "startedAt": state.started_at.to_rfc3339(),
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds().max(0),
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": session_count,
        "providers": state.providers.list(),
        "startupProbes": probes,
        "restartAttemptsInWindow": state.restart.attempts_in_window(),
        "evolutionActive": state.evolution.active(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /control/v1/providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn providers(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.failover.snapshot();
    let items: Vec<serde_json::Value> = state
        .providers
        .list()
        .into_iter()
        .map(|id| {
            let profile = state.providers.profile(&id);
            let capabilities = state.providers.capabilities(&id).ok();
            let provider_health = health.iter().find(|h| h.provider_id == id);
            serde_json::json!({
                "id": id,
                "kind": profile.map(|p| p.kind),
                "family": profile.map(|p| p.family),
                "model": profile.map(|p| p.model.clone()),
                "capabilities": capabilities,
                "health": provider_health,
            })
        })
        .collect();

    Json(serde_json::json!({
        "providers": items,
        "defaultProviderId": state.providers.default_provider_id(),
        "initErrors": state.providers.init_errors(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /control/v1/orchestration/lanes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn lanes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.lanes.snapshot())
}
