use crate::auth::CurrentUser;
use crate::models::api::UploadResponse;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, State},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// POST /upload — admin only; ingests one multipart document.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    user.require_admin()?;
    let organization_id = user
        .0
        .organization_id
        .clone()
        .ok_or(ApiError::OrganizationRequired)?;

    let mut filename: Option<String> = None;
    let mut file_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("failed to read field: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().map(|s| s.to_string());
            file_data = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("failed to read file: {}", e)))?
                    .to_vec(),
            );
        }
    }

    let filename = filename.ok_or_else(|| ApiError::InvalidInput("filename required".to_string()))?;
    let file_data = file_data.ok_or_else(|| ApiError::InvalidInput("file required".to_string()))?;

    if file_data.is_empty() {
        return Err(ApiError::InvalidInput("uploaded file is empty".to_string()));
    }

    info!(
        "Upload from {}: {} ({} bytes)",
        user.0.user_id,
        filename,
        file_data.len()
    );

    let deadline = Duration::from_secs(state.settings.timeouts.ingest_seconds);
    let outcome = tokio::time::timeout(
        deadline,
        state
            .indexing_service
            .ingest(&filename, file_data, &organization_id),
    )
    .await
    .map_err(|_| ApiError::Cancelled)??;

    Ok(Json(UploadResponse {
        doc_id: outcome.doc_id,
        chunks_indexed: outcome.chunks_indexed,
    }))
}
