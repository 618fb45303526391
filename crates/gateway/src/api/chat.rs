//! POST /control/v1/chat/send -- run one turn through the session's lane.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::runtime::lanes::LaneSubmission;
use crate::state::AppState;

use super::{api_error, error_response};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    session_id: String,
    input: String,
    #[serde(default)]
    input_images: Vec<String>,
    #[serde(default)]
    route_id: Option<String>,
}

pub async fn send(State(state): State<AppState>, Json(req): Json<ChatSendRequest>) -> Response {
    if req.input.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "invalid_request", "input is empty");
    }

    if let Err(e) = state.manager.ensure_session(&req.session_id, None, None, None) {
        return error_response(&e);
    }

    let rx = state.lanes.submit(
        &req.session_id,
        LaneSubmission {
            input: req.input,
            input_images: req.input_images,
            route_id: req.route_id,
            on_event: None,
        },
    );

    match rx.await {
        Ok(Ok(outcome)) => Json(serde_json::json!({
            "sessionId": req.session_id,
            "providerId": outcome.provider_id,
            "response": outcome.response,
            "usage": outcome.usage,
        }))
        .into_response(),
        Ok(Err(lane_error)) => {
            let status = match lane_error.code.as_str() {
                "unknown_session" | "unknown_provider" => StatusCode::NOT_FOUND,
                "provider_transport" | "provider_timeout" | "provider_auth"
                | "internal_error" | "io_error" | "json_error" => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                _ => StatusCode::BAD_REQUEST,
            };
            api_error(status, &lane_error.code, lane_error.message)
        }
        Err(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "turn result channel closed",
        ),
    }
}
