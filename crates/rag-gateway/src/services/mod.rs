pub mod analytics;
pub mod embedding_service;
pub mod indexing_service;
pub mod llm_service;
pub mod query_service;
pub mod retrieval_service;

pub use analytics::{AnalyticsSink, NoopSink, PgAnalyticsSink, QueryEvent, TracingSink};
pub use embedding_service::{EmbeddingBackend, EmbeddingService, HashEmbeddingBackend, HttpEmbeddingBackend};
pub use indexing_service::IndexingService;
pub use llm_service::{LlmProvider, LlmService};
pub use query_service::{AnswerEmitter, QueryOptions, QueryService};
pub use retrieval_service::{RetrievalOptions, RetrievalService, SearchResult};
