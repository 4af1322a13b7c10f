//! Administrative system endpoints, guarded by the shared system key.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SystemQuery {
    #[serde(default)]
    key: String,
}

/// Process and control-plane introspection.
pub async fn info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SystemQuery>,
) -> Response {
    let Some(expected) = state.system_key.as_deref() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "APP_SYSTEM_KEY is not set" })),
        )
            .into_response();
    };

    if query.key.is_empty() || query.key != expected {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid key" })),
        )
            .into_response();
    }

    Json(json!({
        "code": "200",
        "data": {
            "version": env!("CARGO_PKG_VERSION"),
            "pid": std::process::id(),
            "lifecycle": state.lifecycle(),
            "in_flight": state.drain.in_flight(),
            "rate_limited_keys": state.admission.tracked_keys(),
        }
    }))
    .into_response()
}
