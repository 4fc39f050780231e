use std::sync::Arc;

use crate::auth::SessionGate;
use crate::config::Settings;
use crate::database::DocumentStore;
use crate::index::lexical::LexicalIndex;
use crate::index::vector::VectorIndex;
use crate::services::{
    EmbeddingService, IndexingService, LlmService, QueryService, RetrievalService,
};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers. Built once at startup; no
/// implicit globals.
pub struct AppState {
    pub settings: Settings,
    pub session_gate: Arc<SessionGate>,
    pub documents: Arc<dyn DocumentStore>,
    pub vector_index: Arc<VectorIndex>,
    pub lexical_index: Arc<LexicalIndex>,
    pub embedding_service: Arc<EmbeddingService>,
    pub retrieval_service: Arc<RetrievalService>,
    pub indexing_service: Arc<IndexingService>,
    pub llm_service: Arc<LlmService>,
    pub query_service: Arc<QueryService>,
    pub limiters: Arc<Limiters>,
}
