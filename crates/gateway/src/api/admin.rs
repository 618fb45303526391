//! Admin write routes: evolution transactions and restart requests.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use drost_domain::Error;

use crate::runtime::evolution::EvolutionStep;
use crate::runtime::restart::RestartIntent;
use crate::state::AppState;

use super::{api_error, error_response};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /control/v1/evolution/run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionRequest {
    session_id: String,
    steps: Vec<EvolutionStep>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    restart: bool,
}

pub async fn run_evolution(
    State(state): State<AppState>,
    Json(req): Json<EvolutionRequest>,
) -> Response {
    match state
        .evolution
        .run(&req.session_id, req.steps, req.summary, req.restart)
        .await
    {
        Ok(result) => Json(result).into_response(),
        // One active transaction per process; later requests get `busy`.
        Err(Error::Conflict(message)) => {
            api_error(StatusCode::BAD_REQUEST, "busy", message)
        }
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /control/v1/restart
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartRequest {
    intent: RestartIntent,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    dry_run: bool,
}

pub async fn restart(State(state): State<AppState>, Json(req): Json<RestartRequest>) -> Response {
    let reason = req.reason.as_deref().unwrap_or("control api request");
    match state.restart.request(req.intent, reason, req.dry_run) {
        Ok(result) => {
            state.events.publish(serde_json::json!({
                "type": "gateway.restart_requested",
                "intent": req.intent,
                "reason": reason,
                "dryRun": req.dry_run,
            }));
            Json(result).into_response()
        }
        Err(e) => error_response(&e),
    }
}
