//! Session management routes.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use drost_domain::session::{SessionOrigin, SessionRecord};
use drost_sessions::{derive_session_id, SessionKeyParts};

use crate::state::AppState;

use super::error_response;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /control/v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.manager.list_sessions() {
        Ok(sessions) => {
            let items: Vec<serde_json::Value> = sessions
                .into_iter()
                .map(|(id, entry)| {
                    let mut value = serde_json::to_value(&entry).unwrap_or_default();
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("sessionId".into(), serde_json::json!(id));
                    }
                    value
                })
                .collect();
            Json(serde_json::json!({ "sessions": items })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /control/v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    from_session_id: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let chat_id = uuid::Uuid::new_v4().as_simple().to_string();
    let (session_id, origin) = match &req.channel {
        Some(channel) => {
            let parts = SessionKeyParts {
                channel: channel.clone(),
                chat_id: Some(chat_id[..12].to_owned()),
                ..Default::default()
            };
            let id = derive_session_id(&parts, state.config.sessions.session_key_max_len);
            let origin = SessionOrigin {
                channel: Some(channel.clone()),
                chat_id: parts.chat_id.clone(),
                ..Default::default()
            };
            (id, Some(origin))
        }
        None => (format!("sess-{}", &chat_id[..12]), None),
    };

    // Seeding from an existing session copies its canonical record.
    if let Some(from) = &req.from_session_id {
        let source = match state.store.export(from) {
            Ok(record) => record,
            Err(e) => return error_response(&e),
        };
        let mut cloned = source;
        cloned.session_id = session_id.clone();
        cloned.metadata.title = req.title.clone().or(cloned.metadata.title);
        cloned.metadata.origin = origin.clone().or(cloned.metadata.origin);
        if let Err(e) = state.store.import(&cloned, false) {
            return error_response(&e);
        }
        return Json(serde_json::json!({ "sessionId": session_id })).into_response();
    }

    match state
        .manager
        .ensure_session(&session_id, None, req.title.clone(), origin)
    {
        Ok(_) => Json(serde_json::json!({ "sessionId": session_id })).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session routes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.get_record(&id) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.delete_session(&id) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueProviderRequest {
    provider_id: String,
}

pub async fn queue_provider(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<QueueProviderRequest>,
) -> Response {
    match state.manager.queue_provider_switch(&id, &req.provider_id) {
        Ok(()) => Json(serde_json::json!({
            "ok": true,
            "pendingProviderId": req.provider_id,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    to_session_id: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Response {
    match state.manager.rename_session(&id, &req.to_session_id) {
        Ok(()) => Json(serde_json::json!({
            "ok": true,
            "sessionId": req.to_session_id,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn export_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.export(&id) {
        Ok(record) => Json(record).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    record: SessionRecord,
    #[serde(default)]
    overwrite: bool,
}

pub async fn import_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ImportRequest>,
) -> Response {
    let mut record = req.record;
    record.session_id = id.clone();
    match state.store.import(&record, req.overwrite) {
        Ok(()) => {
            // Invalidate any stale in-memory copy.
            let _ = state.manager.hydrate_session(&id);
            Json(serde_json::json!({ "ok": true, "sessionId": id })).into_response()
        }
        Err(e) => error_response(&e),
    }
}
