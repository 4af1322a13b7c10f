//! Route registration.

use std::sync::Arc;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::server::AppState;

mod captcha;
mod system;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/system/info", get(system::info))
        .route("/captcha/verify", post(captcha::verify))
}

/// Liveness probe.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
