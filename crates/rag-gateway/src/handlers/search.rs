use crate::auth::CurrentUser;
use crate::models::api::{SuggestParams, SuggestResponse};
use crate::security::PermissionResolver;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Query, State},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

/// GET /search/suggest?prefix= — best-effort autocomplete over the caller's
/// organization vocabulary.
pub async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<SuggestParams>,
) -> Result<Json<SuggestResponse>, ApiError> {
    let view = PermissionResolver::resolve(&user.0)?;

    let suggestions = state.lexical_index.suggest(
        &params.prefix,
        &view.organization_id,
        params.limit.min(50),
    );

    Ok(Json(SuggestResponse { suggestions }))
}

/// GET /files/facets — chunk counts per filename within the caller's view.
pub async fn facets_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<HashMap<String, HashMap<String, u64>>>, ApiError> {
    let view = PermissionResolver::resolve(&user.0)?;

    let facets = state
        .lexical_index
        .facets(&view.filter(), &["filename".to_string()]);

    Ok(Json(facets))
}
