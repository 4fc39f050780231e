use crate::auth::AuthUser;
use crate::models::api::Citation;
use crate::security::PermissionResolver;
use crate::services::analytics::{AnalyticsSink, QueryEvent};
use crate::services::retrieval_service::{RetrievalOptions, RetrievalService, SearchResult};
use crate::services::LlmService;
use crate::utils::error::ApiError;
use crate::utils::token_budget;
use chrono::Utc;
use futures::StreamExt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Separator between sources in the generation prompt.
const SOURCE_SEPARATOR: &str = "\n-----\n";

const INSTRUCTION: &str = "You are an assistant answering questions strictly from the \
supplied sources. Use only the sources below; if they do not contain the answer, say so \
plainly. Cite every claim with the source filename in square brackets, e.g. [report.pdf].";

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub humanize: bool,
    pub stream: bool,
}

/// Where the orchestrator's output goes. The WebSocket handler forwards
/// frames; the HTTP handler buffers them into one response. A send failure
/// means the client is gone and maps to `Cancelled`.
#[async_trait::async_trait]
pub trait AnswerEmitter: Send {
    async fn status(&mut self, message: &str) -> Result<(), ApiError>;
    async fn immediate(&mut self, results: &[SearchResult]) -> Result<(), ApiError>;
    async fn chunks(&mut self, results: &[SearchResult]) -> Result<(), ApiError>;
    async fn stream_start(&mut self) -> Result<(), ApiError>;
    async fn stream_token(&mut self, token: &str) -> Result<(), ApiError>;
    async fn stream_end(&mut self, citations: &[Citation]) -> Result<(), ApiError>;
    async fn overview(&mut self, answer: &str, citations: &[Citation]) -> Result<(), ApiError>;
}

/// Query orchestrator (C10): AUTHORIZE → RETRIEVE → (RAW | PROMPT →
/// GENERATE) → EMIT, with a `QueryEvent` fired on every completion.
pub struct QueryService {
    retrieval: Arc<RetrievalService>,
    llm: Arc<LlmService>,
    analytics: Arc<dyn AnalyticsSink>,
    retrieval_options: RetrievalOptions,
    max_context_tokens: usize,
}

impl QueryService {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        llm: Arc<LlmService>,
        analytics: Arc<dyn AnalyticsSink>,
        retrieval_options: RetrievalOptions,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            retrieval,
            llm,
            analytics,
            retrieval_options,
            max_context_tokens,
        }
    }

    /// Handle one query end-to-end. Returns the retrieval results alongside
    /// any error so transports can surface partial context.
    pub async fn handle<E: AnswerEmitter>(
        &self,
        user: &AuthUser,
        question: &str,
        options: QueryOptions,
        emitter: &mut E,
    ) -> Result<Vec<SearchResult>, (ApiError, Vec<SearchResult>)> {
        let started = Instant::now();
        let query_id = Uuid::new_v4();

        let outcome = self.run(user, question, options, emitter).await;

        let (success, error_kind, results, answer_length) = match &outcome {
            Ok((results, answer_length)) => (true, None, results.clone(), *answer_length),
            Err((e, results)) => (
                false,
                Some(e.internal_kind().to_string()),
                results.clone(),
                0,
            ),
        };

        self.analytics.emit(QueryEvent {
            query_id,
            session_id: user.session_id.clone(),
            user_id: user.user_id.clone(),
            organization_id: user.organization_id.clone().unwrap_or_default(),
            question: question.to_string(),
            answer_length,
            response_time_ms: started.elapsed().as_millis() as u64,
            source_chunk_ids: results.iter().map(|r| r.chunk_id.clone()).collect(),
            humanized: options.humanize,
            success,
            error_kind,
            created_at: Utc::now(),
        });

        outcome.map(|(results, _)| results)
    }

    async fn run<E: AnswerEmitter>(
        &self,
        user: &AuthUser,
        question: &str,
        options: QueryOptions,
        emitter: &mut E,
    ) -> Result<(Vec<SearchResult>, usize), (ApiError, Vec<SearchResult>)> {
        // AUTHORIZE
        let view = PermissionResolver::resolve(user).map_err(|e| (e, Vec::new()))?;

        if question.trim().is_empty() {
            return Err((
                ApiError::InvalidInput("question must not be empty".to_string()),
                Vec::new(),
            ));
        }

        emitter
            .status("Searching documents...")
            .await
            .map_err(|e| (e, Vec::new()))?;

        // RETRIEVE
        let retrieval = self
            .retrieval
            .retrieve(question, &view, &self.retrieval_options)
            .await
            .map_err(|e| (e, Vec::new()))?;
        let results = retrieval.results;

        emitter
            .immediate(&results)
            .await
            .map_err(|e| (e, results.clone()))?;

        let citations = build_citations(&results);

        // DECIDE_MODE
        if !options.humanize {
            emitter
                .chunks(&results)
                .await
                .map_err(|e| (e, results.clone()))?;
            return Ok((results, 0));
        }

        // PROMPT
        let prompt = self.build_prompt(question, &results);
        debug!("Prompt assembled: {} chars, {} sources", prompt.len(), results.len());

        // GENERATE + EMIT
        let answer_length = if options.stream {
            let mut stream = self
                .llm
                .stream(&prompt)
                .await
                .map_err(|e| (e, results.clone()))?;

            emitter
                .stream_start()
                .await
                .map_err(|e| (e, results.clone()))?;

            let mut emitted = 0usize;
            while let Some(item) = stream.next().await {
                let token = item.map_err(|e| (e, results.clone()))?;
                emitter
                    .stream_token(&token)
                    .await
                    .map_err(|e| (e, results.clone()))?;
                emitted += token.len();
            }

            emitter
                .stream_end(&citations)
                .await
                .map_err(|e| (e, results.clone()))?;
            emitted
        } else {
            let answer = self
                .llm
                .generate(&prompt)
                .await
                .map_err(|e| (e, results.clone()))?;
            emitter
                .overview(&answer, &citations)
                .await
                .map_err(|e| (e, results.clone()))?;
            answer.len()
        };

        info!(
            "Query answered for {}: {} sources, {} answer bytes",
            user.user_id,
            results.len(),
            answer_length
        );

        Ok((results, answer_length))
    }

    /// Sources in descending fused order, each delimited and labelled with
    /// its filename so the model can cite; budgeted by estimated tokens.
    fn build_prompt(&self, question: &str, results: &[SearchResult]) -> String {
        let mut prompt = String::with_capacity(4096);
        prompt.push_str(INSTRUCTION);
        prompt.push_str("\n\nSources:\n");

        let mut used_tokens = token_budget::count_tokens(&prompt);

        for result in results {
            let body = result
                .full_file_content
                .as_deref()
                .unwrap_or(&result.text_excerpt);

            let mut source = String::with_capacity(body.len() + 64);
            let _ = write!(source, "{}[{}]\n{}", SOURCE_SEPARATOR, result.filename, body);

            if token_budget::would_exceed(used_tokens, &source, self.max_context_tokens) {
                debug!("Prompt truncated at {} of {} sources", result.chunk_index, results.len());
                break;
            }
            used_tokens += token_budget::count_tokens(&source);
            prompt.push_str(&source);
        }

        let _ = write!(prompt, "{}Question: {}", SOURCE_SEPARATOR, question);
        prompt
    }
}

/// Unique filenames of contributing chunks with their best fused score,
/// descending.
pub fn build_citations(results: &[SearchResult]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for result in results {
        match citations.iter_mut().find(|c| c.filename == result.filename) {
            Some(existing) => {
                if result.fused_score > existing.score {
                    existing.score = result.fused_score;
                }
            }
            None => citations.push(Citation {
                filename: result.filename.clone(),
                score: result.fused_score,
            }),
        }
    }
    citations.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    citations
}
