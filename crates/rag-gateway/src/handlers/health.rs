use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use std::sync::Arc;

pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "rag-gateway"
    }))
}

/// Readiness: the document store must answer a trivial read.
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.documents.list("readiness-probe").await {
        Ok(_) => Ok(Json(json!({
            "status": "ready",
            "indexed_chunks": state.lexical_index.len(),
        }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
