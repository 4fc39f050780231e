use crate::database::DocumentStore;
use crate::document::chunker::TextChunker;
use crate::document::loader;
use crate::index::lexical::LexicalIndex;
use crate::index::vector::VectorIndex;
use crate::index::{DocFilter, IndexedChunk};
use crate::services::EmbeddingService;
use crate::utils::error::ApiError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub doc_id: Uuid,
    pub chunks_indexed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    pub documents: usize,
    pub chunks: usize,
    pub failures: usize,
}

type InflightRegistry = Arc<Mutex<HashSet<(Uuid, String)>>>;

/// Releases the in-flight slot on drop. While armed it also undoes the
/// document's partial state, so a task cancelled mid-ingest leaves no trace.
struct WriteGuard {
    registry: InflightRegistry,
    key: (Uuid, String),
    rollback: Option<RollbackState>,
}

struct RollbackState {
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    documents: Arc<dyn DocumentStore>,
    delete_document: bool,
}

impl WriteGuard {
    fn arm(&mut self, state: RollbackState) {
        self.rollback = Some(state);
    }

    fn disarm(&mut self) {
        self.rollback = None;
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(state) = self.rollback.take() {
            let (doc_id, org) = self.key.clone();
            warn!("Rolling back interrupted write for document {}", doc_id);

            let filter = DocFilter::org(org.clone()).with_doc(doc_id);
            state.vector.delete(&filter);
            state.lexical.delete(&filter);

            if state.delete_document {
                // The store delete is async; hand it to the runtime if one
                // is still around.
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let documents = state.documents;
                    handle.spawn(async move {
                        if let Err(e) = documents.delete(doc_id, &org).await {
                            error!("Rollback delete of document {} failed: {}", doc_id, e);
                        }
                    });
                }
            }
        }

        self.registry.lock().remove(&self.key);
    }
}

/// Indexing pipeline (C8): chunk → embed → dual-write, plus cascade delete
/// and reindex. One in-flight write per `(doc_id, org)`, bounded overall.
pub struct IndexingService {
    documents: Arc<dyn DocumentStore>,
    embedding: Arc<EmbeddingService>,
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    chunker: TextChunker,
    inflight: InflightRegistry,
    max_concurrent: usize,
}

impl IndexingService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        embedding: Arc<EmbeddingService>,
        vector: Arc<VectorIndex>,
        lexical: Arc<LexicalIndex>,
        chunker: TextChunker,
        max_concurrent: usize,
    ) -> Self {
        Self {
            documents,
            embedding,
            vector,
            lexical,
            chunker,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn begin_write(&self, doc_id: Uuid, organization_id: &str) -> Result<WriteGuard, ApiError> {
        let key = (doc_id, organization_id.to_string());
        let mut registry = self.inflight.lock();

        if registry.contains(&key) {
            return Err(ApiError::Busy(format!(
                "write already in flight for document {}",
                doc_id
            )));
        }
        if registry.len() >= self.max_concurrent {
            return Err(ApiError::Busy(format!(
                "too many concurrent index writes (max {})",
                self.max_concurrent
            )));
        }

        registry.insert(key.clone());
        Ok(WriteGuard {
            registry: self.inflight.clone(),
            key,
            rollback: None,
        })
    }

    /// Ingest one uploaded document: persist, decode, chunk, embed, then
    /// write both indices. Any failure past persistence rolls everything
    /// back and surfaces a single error kind.
    pub async fn ingest(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        organization_id: &str,
    ) -> Result<IngestOutcome, ApiError> {
        let file_type = loader::detect_file_type(filename)?;
        loader::validate_content(&bytes, &file_type)?;

        let doc_id = self
            .documents
            .insert(filename, &file_type, bytes.clone(), organization_id)
            .await?;

        let mut guard = match self.begin_write(doc_id, organization_id) {
            Ok(guard) => guard,
            Err(e) => {
                // capacity refused after the row landed; undo it
                let _ = self.documents.delete(doc_id, organization_id).await;
                return Err(e);
            }
        };
        guard.arm(RollbackState {
            vector: self.vector.clone(),
            lexical: self.lexical.clone(),
            documents: self.documents.clone(),
            delete_document: true,
        });

        let chunks_indexed = self
            .index_document(doc_id, filename, &file_type, bytes, organization_id)
            .await?;

        guard.disarm();
        info!(
            "Ingested {} as {} with {} chunks for org {}",
            filename, doc_id, chunks_indexed, organization_id
        );

        Ok(IngestOutcome {
            doc_id,
            chunks_indexed,
        })
    }

    /// Steps 2–5 of ingest, shared with reindex.
    async fn index_document(
        &self,
        doc_id: Uuid,
        filename: &str,
        file_type: &str,
        bytes: Vec<u8>,
        organization_id: &str,
    ) -> Result<usize, ApiError> {
        let file_type_owned = file_type.to_string();
        let text = tokio::task::spawn_blocking(move || loader::decode(&bytes, &file_type_owned))
            .await
            .map_err(|e| ApiError::Internal(format!("decode task failed: {}", e)))??;

        if text.trim().is_empty() {
            return Err(ApiError::InvalidInput(
                "no text content found in document".to_string(),
            ));
        }

        let chunks = self.chunker.chunk(&text, file_type);
        if chunks.is_empty() {
            return Err(ApiError::InvalidInput("document produced no chunks".to_string()));
        }
        debug!("Chunked {} into {} pieces", filename, chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedding.embed(&texts).await?;

        let uploaded_at = Utc::now();
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| IndexedChunk {
                doc_id,
                chunk_index: i as u32,
                filename: filename.to_string(),
                organization_id: organization_id.to_string(),
                text: chunk.text,
                chunk_start: chunk.chunk_start,
                chunk_end: chunk.chunk_end,
                token_count: chunk.token_count,
                embedding,
                uploaded_at,
            })
            .collect();

        let count = indexed.len();

        if let Err(e) = self.vector.upsert(indexed.clone()) {
            return Err(ApiError::IndexWriteFailed(e.to_string()));
        }
        self.lexical.index(&indexed);

        Ok(count)
    }

    /// Cascade delete: both indices, then the store. Idempotent; a second
    /// call reports zero rows.
    pub async fn delete(&self, doc_id: Uuid, organization_id: &str) -> Result<u64, ApiError> {
        let _guard = self.begin_write(doc_id, organization_id)?;

        let filter = DocFilter::org(organization_id.to_string()).with_doc(doc_id);
        let dense_removed = self.vector.delete(&filter);
        let lexical_removed = self.lexical.delete(&filter);
        let rows = self.documents.delete(doc_id, organization_id).await?;

        info!(
            "Deleted document {} for org {}: {} rows, {} dense chunks, {} lexical chunks",
            doc_id, organization_id, rows, dense_removed, lexical_removed
        );

        Ok(rows)
    }

    /// Rebuild one document's chunks in both indices from the stored bytes.
    pub async fn reindex(&self, doc_id: Uuid, organization_id: &str) -> Result<usize, ApiError> {
        let doc = self.documents.get(doc_id, organization_id).await?;

        let mut guard = self.begin_write(doc_id, organization_id)?;

        let filter = DocFilter::org(organization_id.to_string()).with_doc(doc_id);
        self.vector.delete(&filter);
        self.lexical.delete(&filter);

        guard.arm(RollbackState {
            vector: self.vector.clone(),
            lexical: self.lexical.clone(),
            documents: self.documents.clone(),
            delete_document: true,
        });

        let count = self
            .index_document(
                doc_id,
                &doc.record.filename,
                &doc.record.file_type,
                doc.content,
                organization_id,
            )
            .await?;

        guard.disarm();
        info!("Reindexed {} ({} chunks)", doc_id, count);
        Ok(count)
    }

    /// Rebuild every document in an organization. Per-document failures are
    /// logged and counted rather than aborting the sweep.
    pub async fn reindex_all(&self, organization_id: &str) -> Result<ReindexReport, ApiError> {
        let records = self.documents.list(organization_id).await?;
        let mut report = ReindexReport::default();

        for record in records {
            match self.reindex(record.doc_id, organization_id).await {
                Ok(chunks) => {
                    report.documents += 1;
                    report.chunks += chunks;
                }
                Err(e) => {
                    error!("Reindex of {} failed: {}", record.doc_id, e);
                    report.failures += 1;
                }
            }
        }

        info!(
            "Full reindex for org {}: {} docs, {} chunks, {} failures",
            organization_id, report.documents, report.chunks, report.failures
        );
        Ok(report)
    }

    pub fn inflight_writes(&self) -> usize {
        self.inflight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, LimitsConfig};
    use crate::database::MemoryStore;
    use crate::services::embedding_service::HashEmbeddingBackend;
    use crate::utils::limiters::Limiters;

    fn service() -> IndexingService {
        service_with_limit(16)
    }

    fn service_with_limit(max_concurrent: usize) -> IndexingService {
        let store = Arc::new(MemoryStore::new());
        let limiters = Arc::new(Limiters::new(&LimitsConfig::default()));
        let embedding = Arc::new(EmbeddingService::new(
            Arc::new(HashEmbeddingBackend::new(64)),
            &EmbeddingConfig {
                dimension: 64,
                ..Default::default()
            },
            limiters,
        ));
        IndexingService::new(
            store,
            embedding,
            Arc::new(VectorIndex::new(64)),
            Arc::new(LexicalIndex::new()),
            TextChunker::default(),
            max_concurrent,
        )
    }

    #[tokio::test]
    async fn ingest_writes_store_and_both_indices() {
        let service = service();
        let outcome = service
            .ingest(
                "ml_basics.txt",
                b"Machine learning enables systems to learn from data.".to_vec(),
                "orgA",
            )
            .await
            .unwrap();

        assert!(outcome.chunks_indexed >= 1);
        assert_eq!(service.vector.len(), outcome.chunks_indexed);
        assert_eq!(service.lexical.len(), outcome.chunks_indexed);
        assert!(service
            .documents
            .get(outcome.doc_id, "orgA")
            .await
            .is_ok());
        assert_eq!(service.inflight_writes(), 0);
    }

    #[tokio::test]
    async fn empty_document_is_rejected_and_rolled_back() {
        let service = service();
        let err = service
            .ingest("empty.txt", b"   \n ".to_vec(), "orgA")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");

        // rollback is spawned from the guard drop; give it a beat
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(service.documents.list("orgA").await.unwrap().is_empty());
        assert_eq!(service.vector.len(), 0);
        assert_eq!(service.lexical.len(), 0);
        assert_eq!(service.inflight_writes(), 0);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected_up_front() {
        let service = service();
        let err = service
            .ingest("payload.exe", b"MZ...".to_vec(), "orgA")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert!(service.documents.list("orgA").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_and_is_idempotent() {
        let service = service();
        let outcome = service
            .ingest("temp.txt", b"Temporary content for deletion.".to_vec(), "orgA")
            .await
            .unwrap();

        assert_eq!(service.delete(outcome.doc_id, "orgA").await.unwrap(), 1);
        assert_eq!(service.vector.len(), 0);
        assert_eq!(service.lexical.len(), 0);
        assert!(service.documents.get(outcome.doc_id, "orgA").await.is_err());

        // second delete reports nothing removed
        assert_eq!(service.delete(outcome.doc_id, "orgA").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_respects_org_boundary() {
        let service = service();
        let outcome = service
            .ingest("mine.txt", b"Org A content.".to_vec(), "orgA")
            .await
            .unwrap();

        assert_eq!(service.delete(outcome.doc_id, "orgB").await.unwrap(), 0);
        assert_eq!(service.vector.len(), 1);
        assert!(service.documents.get(outcome.doc_id, "orgA").await.is_ok());
    }

    #[tokio::test]
    async fn reindex_rebuilds_chunks() {
        let service = service();
        let outcome = service
            .ingest("doc.txt", b"Stable content for reindex.".to_vec(), "orgA")
            .await
            .unwrap();

        let chunks = service.reindex(outcome.doc_id, "orgA").await.unwrap();
        assert_eq!(chunks, outcome.chunks_indexed);
        assert_eq!(service.vector.len(), chunks);
        assert_eq!(service.lexical.len(), chunks);
    }

    #[tokio::test]
    async fn reindex_missing_document_is_not_found() {
        let service = service();
        let err = service.reindex(Uuid::new_v4(), "orgA").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn concurrent_write_for_same_document_is_busy() {
        let service = service();
        let outcome = service
            .ingest("doc.txt", b"Some busy content.".to_vec(), "orgA")
            .await
            .unwrap();

        let _held = service.begin_write(outcome.doc_id, "orgA").unwrap();
        let err = service.delete(outcome.doc_id, "orgA").await.unwrap_err();
        assert_eq!(err.kind(), "Busy");
    }

    #[tokio::test]
    async fn ingest_capacity_is_bounded() {
        let service = service_with_limit(1);
        let _held = service.begin_write(Uuid::new_v4(), "orgA").unwrap();

        let err = service
            .ingest("doc.txt", b"Over capacity.".to_vec(), "orgA")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Busy");
        // the provisional row was removed again
        assert!(service.documents.list("orgA").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reindex_all_covers_the_org() {
        let service = service();
        service
            .ingest("a.txt", b"First document text.".to_vec(), "orgA")
            .await
            .unwrap();
        service
            .ingest("b.txt", b"Second document text.".to_vec(), "orgA")
            .await
            .unwrap();
        service
            .ingest("c.txt", b"Other org text.".to_vec(), "orgB")
            .await
            .unwrap();

        let report = service.reindex_all("orgA").await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.failures, 0);
    }
}
