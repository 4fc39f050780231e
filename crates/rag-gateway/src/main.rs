use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use rag_gateway::auth::SessionGate;
use rag_gateway::config::Settings;
use rag_gateway::database::{
    DbPool, DocumentStore, MemoryStore, Repository, SessionStore,
};
use rag_gateway::document::chunker::TextChunker;
use rag_gateway::handlers;
use rag_gateway::index::lexical::LexicalIndex;
use rag_gateway::index::vector::VectorIndex;
use rag_gateway::services::analytics::SinkConfig;
use rag_gateway::services::{
    AnalyticsSink, EmbeddingBackend, EmbeddingService, HashEmbeddingBackend, HttpEmbeddingBackend,
    IndexingService, LlmService, PgAnalyticsSink, QueryService, RetrievalOptions,
    RetrievalService, TracingSink,
};
use rag_gateway::state::AppState;
use rag_gateway::utils::limiters::Limiters;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rag_gateway=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting RAG gateway...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let limiters = Arc::new(Limiters::new(&settings.limits));

    // Stores: Postgres when configured, in-process otherwise.
    let (documents, sessions, analytics): (
        Arc<dyn DocumentStore>,
        Arc<dyn SessionStore>,
        Arc<dyn AnalyticsSink>,
    ) = if settings.database.url.is_empty() {
        info!("No database configured, using in-process store");
        let store = Arc::new(MemoryStore::new());
        (store.clone(), store, Arc::new(TracingSink))
    } else {
        let pool = DbPool::new(&settings.database).await?;
        let pg = pool.get_pool().clone();
        let repository = Arc::new(Repository::new(pool));
        repository.migrate().await?;
        info!("Database connection established");
        (
            repository.clone(),
            repository,
            Arc::new(PgAnalyticsSink::new(pg, SinkConfig::default())),
        )
    };

    let session_gate = Arc::new(SessionGate::new(
        sessions,
        settings.auth.users.clone(),
        settings.auth.session_ttl_hours,
    ));

    let embedding_backend: Arc<dyn EmbeddingBackend> = if settings.embedding.base_url.is_empty() {
        info!(
            "No embedding server configured, using deterministic local backend (dim {})",
            settings.embedding.dimension
        );
        Arc::new(HashEmbeddingBackend::new(settings.embedding.dimension))
    } else {
        Arc::new(HttpEmbeddingBackend::new(&settings.embedding))
    };
    let embedding_service = Arc::new(EmbeddingService::new(
        embedding_backend,
        &settings.embedding,
        limiters.clone(),
    ));

    let vector_index = Arc::new(VectorIndex::new(settings.embedding.dimension));
    let lexical_index = Arc::new(LexicalIndex::new());

    let retrieval_service = Arc::new(RetrievalService::new(
        embedding_service.clone(),
        vector_index.clone(),
        lexical_index.clone(),
        documents.clone(),
        limiters.clone(),
    ));

    let indexing_service = Arc::new(IndexingService::new(
        documents.clone(),
        embedding_service.clone(),
        vector_index.clone(),
        lexical_index.clone(),
        TextChunker::new(
            settings.indexing.target_chunk_tokens,
            settings.indexing.token_overlap,
        ),
        settings.indexing.max_concurrent_ingests,
    ));

    let llm_service = Arc::new(LlmService::new(&settings.llm, limiters.clone()));

    let query_service = Arc::new(QueryService::new(
        retrieval_service.clone(),
        llm_service.clone(),
        analytics,
        RetrievalOptions::from(&settings.retrieval),
        settings.retrieval.max_context_tokens,
    ));

    let state = Arc::new(AppState {
        settings: settings.clone(),
        session_gate: session_gate.clone(),
        documents,
        vector_index,
        lexical_index,
        embedding_service,
        retrieval_service,
        indexing_service,
        llm_service,
        query_service,
        limiters,
    });

    // Hourly sweep of expired sessions.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(e) = session_gate.sweep_expired().await {
                tracing::warn!("Session sweep failed: {}", e);
            }
        }
    });

    let app = build_router(state);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // public
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/login", post(handlers::auth::login_handler))
        // session
        .route("/logout", post(handlers::auth::logout_handler))
        .route("/files/list", get(handlers::files::list_files_handler))
        .route(
            "/files/content/{filename}",
            get(handlers::files::file_content_handler),
        )
        .route("/files/facets", get(handlers::search::facets_handler))
        .route("/search/suggest", get(handlers::search::suggest_handler))
        .route("/query", post(handlers::query::query_handler))
        .route("/ws/query", get(handlers::ws::ws_query_handler))
        // admin
        .route("/upload", post(handlers::upload::upload_handler))
        .route(
            "/files/delete_by_fileid",
            delete(handlers::files::delete_file_handler),
        )
        .route("/reindex/full", post(handlers::reindex::reindex_full_handler))
        .route(
            "/reindex/file/{filename}",
            post(handlers::reindex::reindex_file_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        // uploads up to 100MB
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .with_state(state)
}
