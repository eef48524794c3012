use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::state::AppState;

/// Liveness only; the aggregate check lives under `/api/instance-status`.
pub async fn liveness(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().timestamp_millis(),
        "env": state.config.environment,
    }))
}
