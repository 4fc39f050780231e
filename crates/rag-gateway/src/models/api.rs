use crate::services::retrieval_service::SearchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_id: String,
    pub role: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_true")]
    pub humanize: bool,
    #[serde(default)]
    pub stream: bool,
}

/// One cited source: a contributing filename with its best fused score.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub filename: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<Vec<SearchResult>>,
    pub citations: Vec<Citation>,
}

/// Failure body carrying whatever retrieval context was already computed.
#[derive(Debug, Serialize)]
pub struct QueryErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialContext>,
}

#[derive(Debug, Serialize)]
pub struct PartialContext {
    pub chunks: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub doc_id: Uuid,
    pub chunks_indexed: usize,
}

#[derive(Debug, Serialize)]
pub struct FileInfo {
    pub doc_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ReindexResponse {
    pub documents: usize,
    pub chunks: usize,
    pub failures: usize,
}

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    pub prefix: String,
    #[serde(default = "default_suggest_limit")]
    pub limit: usize,
}

fn default_suggest_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteByFileIdParams {
    pub file_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert!(req.humanize);
        assert!(!req.stream);

        let req: QueryRequest =
            serde_json::from_str(r#"{"question":"hi","humanize":false,"stream":true}"#).unwrap();
        assert!(!req.humanize);
        assert!(req.stream);
    }

    #[test]
    fn error_response_shape() {
        let body = QueryErrorResponse {
            error: "LLMUnavailable".to_string(),
            message: "all providers failed".to_string(),
            partial: Some(PartialContext { chunks: vec![] }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "LLMUnavailable");
        assert!(json["partial"]["chunks"].is_array());
    }
}
