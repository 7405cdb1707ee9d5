use axum::{response::IntoResponse, Json};
use serde_json::json;

/// 进程存活探针
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
