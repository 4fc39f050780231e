use crate::auth::CurrentUser;
use crate::models::api::{DeleteByFileIdParams, DeleteResponse, FileInfo, FileListResponse};
use crate::security::PermissionResolver;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    Json,
};
use std::sync::Arc;
use tracing::info;

/// GET /files/list — documents in the caller's organization, filtered by the
/// caller's allow-list.
pub async fn list_files_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<FileListResponse>, ApiError> {
    let view = PermissionResolver::resolve(&user.0)?;

    let files: Vec<FileInfo> = state
        .documents
        .list(&view.organization_id)
        .await?
        .into_iter()
        .filter(|record| view.can_read_file(&record.filename))
        .map(|record| FileInfo {
            doc_id: record.doc_id,
            filename: record.filename,
            file_type: record.file_type,
            size_bytes: record.size_bytes,
            uploaded_at: record.uploaded_at,
        })
        .collect();

    let total = files.len();
    Ok(Json(FileListResponse { files, total }))
}

/// GET /files/content/{filename} — raw document bytes if permitted. A file
/// outside the caller's org is indistinguishable from a missing one.
pub async fn file_content_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(filename): Path<String>,
) -> Result<(HeaderMap, Vec<u8>), ApiError> {
    let view = PermissionResolver::resolve(&user.0)?;

    if !view.can_read_file(&filename) {
        return Err(ApiError::PermissionDenied(format!(
            "no access to {}",
            filename
        )));
    }

    let doc = state
        .documents
        .get_by_filename(&filename, &view.organization_id)
        .await?;

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    Ok((headers, doc.content))
}

/// DELETE /files/delete_by_fileid?file_id= — admin only; cascades through
/// both indices and the store. Safe to repeat.
pub async fn delete_file_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(params): Query<DeleteByFileIdParams>,
) -> Result<Json<DeleteResponse>, ApiError> {
    user.require_admin()?;
    let view = PermissionResolver::resolve(&user.0)?;

    let deleted_count = state
        .indexing_service
        .delete(params.file_id, &view.organization_id)
        .await?;

    info!(
        "Delete request for {} by {}: {} rows",
        params.file_id, user.0.user_id, deleted_count
    );

    Ok(Json(DeleteResponse { deleted_count }))
}
