use crate::models::api::{LoginRequest, LoginResponse};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::http::HeaderMap;
use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "username and password required".to_string(),
        ));
    }

    let (session_id, role) = state.session_gate.authenticate(&req.username, &req.password).await?;

    Ok(Json(LoginResponse {
        session_id,
        role: role.as_str().to_string(),
    }))
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = token_from_headers(&headers)
        .ok_or_else(|| ApiError::Unauthenticated("missing session token".to_string()))?;

    state.session_gate.logout(&token).await?;
    info!("Session logged out");

    Ok(Json(json!({ "success": true })))
}
