use crate::auth::CurrentUser;
use crate::models::api::ReindexResponse;
use crate::security::PermissionResolver;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// POST /reindex/full — admin only; rebuilds every index entry for the
/// caller's organization.
pub async fn reindex_full_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<ReindexResponse>, ApiError> {
    user.require_admin()?;
    let view = PermissionResolver::resolve(&user.0)?;

    info!("Full reindex requested by {} for org {}", user.0.user_id, view.organization_id);

    let deadline = Duration::from_secs(state.settings.timeouts.reindex_seconds);
    let report = tokio::time::timeout(
        deadline,
        state.indexing_service.reindex_all(&view.organization_id),
    )
    .await
    .map_err(|_| ApiError::Cancelled)??;

    Ok(Json(ReindexResponse {
        documents: report.documents,
        chunks: report.chunks,
        failures: report.failures,
    }))
}

/// POST /reindex/file/{filename} — admin only; rebuilds one document.
pub async fn reindex_file_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(filename): Path<String>,
) -> Result<Json<ReindexResponse>, ApiError> {
    user.require_admin()?;
    let view = PermissionResolver::resolve(&user.0)?;

    let doc = state
        .documents
        .get_by_filename(&filename, &view.organization_id)
        .await?;

    let deadline = Duration::from_secs(state.settings.timeouts.reindex_seconds);
    let chunks = tokio::time::timeout(
        deadline,
        state
            .indexing_service
            .reindex(doc.record.doc_id, &view.organization_id),
    )
    .await
    .map_err(|_| ApiError::Cancelled)??;

    Ok(Json(ReindexResponse {
        documents: 1,
        chunks,
        failures: 0,
    }))
}
