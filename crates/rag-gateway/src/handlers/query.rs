use crate::auth::CurrentUser;
use crate::models::api::{
    Citation, PartialContext, QueryErrorResponse, QueryRequest, QueryResponse,
};
use crate::services::query_service::{AnswerEmitter, QueryOptions};
use crate::services::retrieval_service::SearchResult;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Collects the orchestrator's emissions into a single HTTP response body.
#[derive(Default)]
struct BufferingEmitter {
    chunks: Option<Vec<SearchResult>>,
    answer: String,
    citations: Vec<Citation>,
}

#[async_trait::async_trait]
impl AnswerEmitter for BufferingEmitter {
    async fn status(&mut self, _message: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn immediate(&mut self, _results: &[SearchResult]) -> Result<(), ApiError> {
        Ok(())
    }

    async fn chunks(&mut self, results: &[SearchResult]) -> Result<(), ApiError> {
        self.chunks = Some(results.to_vec());
        Ok(())
    }

    async fn stream_start(&mut self) -> Result<(), ApiError> {
        Ok(())
    }

    async fn stream_token(&mut self, token: &str) -> Result<(), ApiError> {
        self.answer.push_str(token);
        Ok(())
    }

    async fn stream_end(&mut self, citations: &[Citation]) -> Result<(), ApiError> {
        self.citations = citations.to_vec();
        Ok(())
    }

    async fn overview(&mut self, answer: &str, citations: &[Citation]) -> Result<(), ApiError> {
        self.answer = answer.to_string();
        self.citations = citations.to_vec();
        Ok(())
    }
}

/// POST /query — one-shot RAG query. On a downstream outage the already
/// retrieved context ships in the failure body so the client keeps the raw
/// chunks.
pub async fn query_handler(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(req): Json<QueryRequest>,
) -> Response {
    info!("Query from {}: {:.60}", user.0.user_id, req.question);

    let mut emitter = BufferingEmitter::default();
    let options = QueryOptions {
        humanize: req.humanize,
        // HTTP is one-shot; token streaming lives on /ws/query
        stream: false,
    };

    let deadline = Duration::from_secs(state.settings.timeouts.query_seconds);
    let outcome = tokio::time::timeout(
        deadline,
        state
            .query_service
            .handle(&user.0, &req.question, options, &mut emitter),
    )
    .await;

    match outcome {
        Ok(Ok(_results)) => {
            let body = QueryResponse {
                answer: if req.humanize {
                    Some(emitter.answer)
                } else {
                    None
                },
                chunks: emitter.chunks,
                citations: emitter.citations,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err((error, partial))) if error.is_downstream_outage() && !partial.is_empty() => {
            // degraded answer: retrieval context with humanize=false semantics
            let body = QueryErrorResponse {
                error: error.kind().to_string(),
                message: error.to_string(),
                partial: Some(PartialContext { chunks: partial }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err((error, _))) => error.into_response(),
        Err(_) => ApiError::Cancelled.into_response(),
    }
}
