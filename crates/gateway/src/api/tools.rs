//! POST /control/v1/tools/run -- direct tool invocation.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::state::AppState;

use super::error_response;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunToolRequest {
    #[serde(default)]
    session_id: Option<String>,
    tool: String,
    #[serde(default)]
    input: Value,
}

pub async fn run_tool(State(state): State<AppState>, Json(req): Json<RunToolRequest>) -> Response {
    let session_id = req.session_id.as_deref().unwrap_or("control");
    let events = state.events.clone();
    let session_for_events = session_id.to_owned();
    let sink = move |event| {
        events.publish_turn(&session_for_events, &event);
    };

    match state
        .tools
        .run_tool(session_id, &req.tool, req.input, None, Some(&sink))
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(&e),
    }
}
