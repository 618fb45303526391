//! Control API: `/control/v1/*`.
//!
//! Every failure body is `{ok:false, code, message, issues?}`; the HTTP
//! status carries the coarse class (401/429/400/404/500).

pub mod admin;
pub mod auth;
pub mod chat;
pub mod events;
pub mod sessions;
pub mod status;
pub mod tools;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use drost_domain::Error;

use crate::state::AppState;

/// Build the full control router. `state` is needed to wire the auth
/// middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Reads
        .route("/control/v1/status", get(status::status))
        .route("/control/v1/providers", get(status::providers))
        .route("/control/v1/orchestration/lanes", get(status::lanes))
        .route("/control/v1/events", get(events::events_sse))
        .route(
            "/control/v1/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/control/v1/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/control/v1/sessions/:id/export", get(sessions::export_session))
        // Writes
        .route("/control/v1/sessions/:id/provider", post(sessions::queue_provider))
        .route("/control/v1/sessions/:id/rename", post(sessions::rename_session))
        .route("/control/v1/sessions/:id/import", post(sessions::import_session))
        .route("/control/v1/chat/send", post(chat::send))
        .route("/control/v1/tools/run", post(tools::run_tool))
        .route("/control/v1/evolution/run", post(admin::run_evolution))
        .route("/control/v1/restart", post(admin::restart))
        .layer(middleware::from_fn_with_state(state, auth::require_auth))
}

/// Standardized JSON error body.
pub(crate) fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "ok": false,
            "code": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Map a domain error to its HTTP response.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::UnknownSession(_) | Error::UnknownProvider(_) | Error::ToolNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::Validation { .. }
        | Error::PolicyDenied(_)
        | Error::PathOutsideRoots { .. }
        | Error::TurnInProgress(_)
        | Error::Conflict(_)
        | Error::BudgetExceeded(_)
        | Error::Cancelled(_)
        | Error::LockConflict(_)
        | Error::GatewayStopping
        | Error::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut body = serde_json::json!({
        "ok": false,
        "code": err.code(),
        "message": err.to_string(),
    });
    if let Some(issues) = err.issues() {
        body["issues"] = serde_json::json!(issues);
    }
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_taxonomy() {
        let resp = error_response(&Error::UnknownSession("s".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = error_response(&Error::validation("bad", vec![]));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = error_response(&Error::Other("boom".into()));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
