//! Liveness probe

use axum::Json;
use serde_json::{json, Value};

/// GET /__heartbeat__
pub async fn heartbeat() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
