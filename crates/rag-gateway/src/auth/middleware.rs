use crate::auth::gate::AuthUser;
use crate::database::Role;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;

/// Extractor that resolves the request's session token into an identity.
/// Accepts `Authorization: Bearer <token>` or a `?token=` query parameter
/// (the latter for WebSocket upgrades).
pub struct CurrentUser(pub AuthUser);

impl CurrentUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.0.role == Role::Admin || self.0.role == Role::Owner {
            Ok(())
        } else {
            Err(ApiError::PermissionDenied(
                "admin role required".to_string(),
            ))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn query_token(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| query_token(parts))
            .ok_or_else(|| ApiError::Unauthenticated("missing session token".to_string()))?;

        let user = state.session_gate.resolve(&token).await?;
        Ok(CurrentUser(user))
    }
}
