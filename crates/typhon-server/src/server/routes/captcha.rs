//! Captcha proof verification endpoint.
//!
//! Takes the widget's proof material as a form post and answers with the
//! policy-mapped verdict. Upstream trouble admits the caller (fail-open);
//! only a well-formed upstream rejection turns them away.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Form, State},
    http::HeaderMap,
    response::Json,
};
use serde_json::{json, Value};
use typhon_gate::{CaptchaProof, CaptchaVerdict};

use crate::server::{client_key, AppState};

pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Form(proof): Form<CaptchaProof>,
) -> Json<Value> {
    let client_ip = client_key(&headers, connect_info.map(|info| info.0));
    let verdict = state.captcha.verify(&proof, &client_ip).await;

    let (label, reason) = match &verdict {
        CaptchaVerdict::Accepted => ("accepted", None),
        CaptchaVerdict::Rejected { reason } => ("rejected", Some(reason.clone())),
        CaptchaVerdict::Indeterminate { .. } => ("indeterminate", None),
    };

    Json(json!({
        "admitted": verdict.allows_entry(),
        "verdict": label,
        "reason": reason,
    }))
}
