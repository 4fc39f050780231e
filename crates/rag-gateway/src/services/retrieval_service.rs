use crate::config::RetrievalConfig;
use crate::database::DocumentStore;
use crate::document::loader;
use crate::index::lexical::{LexicalHit, LexicalIndex};
use crate::index::vector::{VectorHit, VectorIndex};
use crate::index::{analyzer, ChunkKey};
use crate::security::PermissionView;
use crate::services::EmbeddingService;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const RRF_K: f32 = 60.0;
const FILENAME_BOOST: f32 = 1.3;
/// Candidate pool floor per backend before fusion.
const MIN_CANDIDATES: usize = 20;
const EXCERPT_FALLBACK_BYTES: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    Weighted,
    Rrf,
}

impl FusionMethod {
    pub fn parse(s: &str) -> Self {
        match s {
            "rrf" => Self::Rrf,
            _ => Self::Weighted,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub k: usize,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    pub min_fused_score: f32,
    pub enrichment_threshold: f32,
    pub include_full_file: bool,
    pub fusion_method: FusionMethod,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: 10,
            dense_weight: 0.7,
            lexical_weight: 0.3,
            min_fused_score: 0.2,
            enrichment_threshold: 0.5,
            include_full_file: true,
            fusion_method: FusionMethod::Weighted,
        }
    }
}

impl From<&RetrievalConfig> for RetrievalOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k,
            dense_weight: config.dense_weight,
            lexical_weight: config.lexical_weight,
            min_fused_score: config.min_fused_score,
            enrichment_threshold: config.enrichment_threshold,
            include_full_file: config.include_full_file,
            fusion_method: FusionMethod::parse(&config.fusion_method),
        }
    }
}

/// One retrieved chunk after fusion.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub doc_id: Uuid,
    pub chunk_index: u32,
    pub filename: String,
    pub organization_id: String,
    pub text_excerpt: String,
    pub dense_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub fused_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_file_content: Option<String>,
}

/// Retrieval output: ranked results plus the doc-id union for citations.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub results: Vec<SearchResult>,
    pub source_doc_ids: Vec<Uuid>,
}

struct Candidate {
    key: ChunkKey,
    filename: String,
    organization_id: String,
    excerpt: Option<String>,
    text: String,
    dense_score: Option<f32>,
    dense_rank: Option<usize>,
    lexical_score: Option<f32>,
    lexical_rank: Option<usize>,
}

/// Hybrid retrieval engine (C7): dense + lexical fan-out under the caller's
/// permission view, score fusion, filename boost, optional full-document
/// enrichment.
pub struct RetrievalService {
    embedding: Arc<EmbeddingService>,
    vector: Arc<VectorIndex>,
    lexical: Arc<LexicalIndex>,
    documents: Arc<dyn DocumentStore>,
    limiters: Arc<Limiters>,
}

impl RetrievalService {
    pub fn new(
        embedding: Arc<EmbeddingService>,
        vector: Arc<VectorIndex>,
        lexical: Arc<LexicalIndex>,
        documents: Arc<dyn DocumentStore>,
        limiters: Arc<Limiters>,
    ) -> Self {
        Self {
            embedding,
            vector,
            lexical,
            documents,
            limiters,
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        view: &PermissionView,
        options: &RetrievalOptions,
    ) -> Result<Retrieval, ApiError> {
        if question.trim().is_empty() {
            return Err(ApiError::InvalidInput("question must not be empty".to_string()));
        }
        if !view.allow_all && view.allowed_filenames.is_empty() {
            // Nothing is visible; skip the backends entirely.
            return Ok(Retrieval {
                results: Vec::new(),
                source_doc_ids: Vec::new(),
            });
        }

        let filter = view.filter();
        let query_vector = self.embedding.embed_one(question).await?;

        let candidates_k = options.k.max(MIN_CANDIDATES);

        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.search.clone(),
            self.limiters.acquire_timeout,
            "search",
        )
        .await
        .map_err(|e| ApiError::IndexUnavailable(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "search", "wait_queue");

        let exec_start = Instant::now();
        let dense_hits = self
            .vector
            .knn(&query_vector, candidates_k, &filter)
            .map_err(|e| ApiError::IndexUnavailable(e.to_string()))?;
        let lexical_hits = self.lexical.search(question, candidates_k, &filter, true);
        debug!(
            exec_ms = exec_start.elapsed().as_millis() as u64,
            dense = dense_hits.len(),
            lexical = lexical_hits.len(),
            op = "search",
            "exec"
        );

        let mut ranked = fuse(&dense_hits, &lexical_hits, question, options);
        ranked.truncate(options.k);

        let mut results = Vec::with_capacity(ranked.len());
        let mut source_doc_ids: Vec<Uuid> = Vec::new();

        for (candidate, fused_score) in ranked {
            if !source_doc_ids.contains(&candidate.key.doc_id) {
                source_doc_ids.push(candidate.key.doc_id);
            }

            let full_file_content = if options.include_full_file
                && fused_score >= options.enrichment_threshold
            {
                self.load_full_file(&candidate.filename, &view.organization_id).await
            } else {
                None
            };

            let text_excerpt = candidate.excerpt.unwrap_or_else(|| {
                let cut = candidate
                    .text
                    .char_indices()
                    .take_while(|(i, _)| *i < EXCERPT_FALLBACK_BYTES)
                    .last()
                    .map(|(i, c)| i + c.len_utf8())
                    .unwrap_or(0);
                candidate.text[..cut].to_string()
            });

            results.push(SearchResult {
                chunk_id: candidate.key.to_string(),
                doc_id: candidate.key.doc_id,
                chunk_index: candidate.key.chunk_index,
                filename: candidate.filename,
                organization_id: candidate.organization_id,
                text_excerpt,
                dense_score: candidate.dense_score,
                lexical_score: candidate.lexical_score,
                fused_score,
                full_file_content,
            });
        }

        info!(
            "Retrieved {} results from {} docs for org {}",
            results.len(),
            source_doc_ids.len(),
            view.organization_id
        );

        Ok(Retrieval {
            results,
            source_doc_ids,
        })
    }

    /// Full-document enrichment is best-effort: any failure leaves the field
    /// empty rather than failing the query.
    async fn load_full_file(&self, filename: &str, organization_id: &str) -> Option<String> {
        match self.documents.get_by_filename(filename, organization_id).await {
            Ok(doc) => {
                match loader::decode(&doc.content, &doc.record.file_type) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!("Could not decode {} for enrichment: {}", filename, e);
                        None
                    }
                }
            }
            Err(e) => {
                debug!("No full file for enrichment of {}: {}", filename, e);
                None
            }
        }
    }
}

/// Fuse the two ranked lists. Dense scores arrive already in [0, 1]; lexical
/// BM25 is normalized by the per-query maximum. Returns candidates ordered by
/// fused score (desc), dense score (desc), chunk index (asc), key (asc),
/// already filtered by `min_fused_score` and filename-boosted.
fn fuse(
    dense_hits: &[VectorHit],
    lexical_hits: &[LexicalHit],
    question: &str,
    options: &RetrievalOptions,
) -> Vec<(Candidate, f32)> {
    let mut candidates: HashMap<ChunkKey, Candidate> = HashMap::new();

    for (rank, hit) in dense_hits.iter().enumerate() {
        candidates.insert(
            hit.key,
            Candidate {
                key: hit.key,
                filename: hit.filename.clone(),
                organization_id: hit.organization_id.clone(),
                excerpt: None,
                text: hit.text.clone(),
                dense_score: Some(hit.score),
                dense_rank: Some(rank + 1),
                lexical_score: None,
                lexical_rank: None,
            },
        );
    }

    let lexical_max = lexical_hits
        .iter()
        .map(|h| h.score)
        .fold(0.0f32, f32::max);

    for (rank, hit) in lexical_hits.iter().enumerate() {
        let normalized = if lexical_max > 0.0 {
            (hit.score / lexical_max).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let entry = candidates.entry(hit.key).or_insert_with(|| Candidate {
            key: hit.key,
            filename: hit.filename.clone(),
            organization_id: hit.organization_id.clone(),
            excerpt: None,
            text: hit.text.clone(),
            dense_score: None,
            dense_rank: None,
            lexical_score: None,
            lexical_rank: None,
        });
        entry.lexical_score = Some(normalized);
        entry.lexical_rank = Some(rank + 1);
        entry.excerpt = Some(hit.excerpt.clone());
    }

    let question_tokens = analyzer::filename_tokens(question);

    let mut scored: Vec<(Candidate, f32)> = candidates
        .into_values()
        .filter_map(|candidate| {
            let fused = match options.fusion_method {
                FusionMethod::Weighted => {
                    options.dense_weight * candidate.dense_score.unwrap_or(0.0)
                        + options.lexical_weight * candidate.lexical_score.unwrap_or(0.0)
                }
                FusionMethod::Rrf => {
                    let mut sum = 0.0;
                    if let Some(rank) = candidate.dense_rank {
                        sum += 1.0 / (RRF_K + rank as f32);
                    }
                    if let Some(rank) = candidate.lexical_rank {
                        sum += 1.0 / (RRF_K + rank as f32);
                    }
                    sum
                }
            };

            if fused < options.min_fused_score {
                return None;
            }

            // Filename token intersection boost, clipped to the score space.
            let filename_tokens = analyzer::filename_tokens(&candidate.filename);
            let fused = if question_tokens.intersection(&filename_tokens).next().is_some() {
                (fused * FILENAME_BOOST).min(1.0)
            } else {
                fused.min(1.0)
            };

            Some((candidate, fused))
        })
        .collect();

    scored.sort_by(|(a, fa), (b, fb)| {
        fb.partial_cmp(fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = a.dense_score.unwrap_or(0.0);
                let db = b.dense_score.unwrap_or(0.0);
                db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.key.chunk_index.cmp(&b.key.chunk_index))
            .then_with(|| a.key.cmp(&b.key))
    });

    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(doc: Uuid, idx: u32, filename: &str, score: f32) -> VectorHit {
        VectorHit {
            key: ChunkKey::new(doc, idx),
            doc_id: doc,
            chunk_index: idx,
            filename: filename.to_string(),
            organization_id: "orgA".to_string(),
            score,
            text: format!("dense text {}", idx),
        }
    }

    fn lexical(doc: Uuid, idx: u32, filename: &str, score: f32) -> LexicalHit {
        LexicalHit {
            key: ChunkKey::new(doc, idx),
            doc_id: doc,
            chunk_index: idx,
            filename: filename.to_string(),
            organization_id: "orgA".to_string(),
            score,
            excerpt: format!("«match» {}", idx),
            text: format!("lexical text {}", idx),
        }
    }

    #[test]
    fn weighted_fusion_combines_both_backends() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions::default();

        let ranked = fuse(
            &[dense(doc, 0, "a.txt", 0.9)],
            &[lexical(doc, 0, "a.txt", 8.0), lexical(doc, 1, "a.txt", 4.0)],
            "unrelated question",
            &opts,
        );

        // chunk 0: 0.7*0.9 + 0.3*1.0 = 0.93; chunk 1: 0.3*0.5 = 0.15 < 0.2 cut
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.key, ChunkKey::new(doc, 0));
        assert!((ranked[0].1 - 0.93).abs() < 1e-5);
        assert_eq!(ranked[0].0.lexical_score, Some(1.0));
    }

    #[test]
    fn missing_backend_counts_as_zero() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions::default();

        let ranked = fuse(&[dense(doc, 0, "a.txt", 0.5)], &[], "q", &opts);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].1 - 0.35).abs() < 1e-5);
        assert_eq!(ranked[0].0.lexical_score, None);
    }

    #[test]
    fn rrf_fusion_sums_rank_reciprocals() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions {
            fusion_method: FusionMethod::Rrf,
            min_fused_score: 0.0,
            ..Default::default()
        };

        let ranked = fuse(
            &[dense(doc, 0, "a.txt", 0.9), dense(doc, 1, "a.txt", 0.8)],
            &[lexical(doc, 0, "a.txt", 5.0)],
            "q",
            &opts,
        );

        let both = ranked.iter().find(|(c, _)| c.key.chunk_index == 0).unwrap();
        let only_dense = ranked.iter().find(|(c, _)| c.key.chunk_index == 1).unwrap();
        assert!((both.1 - (1.0 / 61.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((only_dense.1 - 1.0 / 62.0).abs() < 1e-6);
        assert!(both.1 > only_dense.1);
    }

    #[test]
    fn filename_match_boosts_and_clips() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions {
            min_fused_score: 0.0,
            ..Default::default()
        };

        // question shares the "basics" token with the filename
        let ranked = fuse(
            &[dense(doc, 0, "ml_basics.txt", 0.5)],
            &[],
            "explain the basics",
            &opts,
        );
        assert!((ranked[0].1 - 0.35 * 1.3).abs() < 1e-5);

        // boost clips at 1.0
        let ranked = fuse(
            &[dense(doc, 0, "ml_basics.txt", 1.0)],
            &[lexical(doc, 0, "ml_basics.txt", 3.0)],
            "ml basics",
            &opts,
        );
        assert!(ranked[0].1 <= 1.0);
        assert!((ranked[0].1 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ordering_ties_break_on_dense_then_chunk_index() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions {
            min_fused_score: 0.0,
            dense_weight: 1.0,
            lexical_weight: 0.0,
            ..Default::default()
        };

        let ranked = fuse(
            &[
                dense(doc, 2, "a.txt", 0.5),
                dense(doc, 1, "a.txt", 0.5),
                dense(doc, 0, "a.txt", 0.5),
            ],
            &[],
            "q",
            &opts,
        );

        let indices: Vec<u32> = ranked.iter().map(|(c, _)| c.key.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn fused_scores_stay_in_unit_interval() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions {
            min_fused_score: 0.0,
            ..Default::default()
        };
        let ranked = fuse(
            &[dense(doc, 0, "q.txt", 1.0)],
            &[lexical(doc, 0, "q.txt", 100.0)],
            "q",
            &opts,
        );
        for (_, score) in &ranked {
            assert!(*score >= 0.0 && *score <= 1.0);
        }
    }

    #[tokio::test]
    async fn enrichment_failure_leaves_content_empty() {
        use crate::config::{EmbeddingConfig, LimitsConfig};
        use crate::database::DocumentStore;
        use crate::index::lexical::LexicalIndex;
        use crate::index::vector::VectorIndex;
        use crate::index::IndexedChunk;
        use crate::security::PermissionView;
        use crate::services::embedding_service::{EmbeddingService, HashEmbeddingBackend};
        use crate::utils::limiters::Limiters;
        use std::sync::Arc;

        mockall::mock! {
            DocStore {}

            #[async_trait::async_trait]
            impl DocumentStore for DocStore {
                async fn insert(
                    &self,
                    filename: &str,
                    file_type: &str,
                    content: Vec<u8>,
                    organization_id: &str,
                ) -> Result<Uuid, crate::utils::error::ApiError>;
                async fn get(
                    &self,
                    doc_id: Uuid,
                    organization_id: &str,
                ) -> Result<crate::database::StoredDocument, crate::utils::error::ApiError>;
                async fn get_by_filename(
                    &self,
                    filename: &str,
                    organization_id: &str,
                ) -> Result<crate::database::StoredDocument, crate::utils::error::ApiError>;
                async fn list(
                    &self,
                    organization_id: &str,
                ) -> Result<Vec<crate::database::DocumentRecord>, crate::utils::error::ApiError>;
                async fn delete(
                    &self,
                    doc_id: Uuid,
                    organization_id: &str,
                ) -> Result<u64, crate::utils::error::ApiError>;
            }
        }

        let mut store = MockDocStore::new();
        store.expect_get_by_filename().returning(|filename, _| {
            Err(crate::utils::error::ApiError::NotFound(filename.to_string()))
        });

        let limiters = Arc::new(Limiters::new(&LimitsConfig::default()));
        let embedding = Arc::new(EmbeddingService::new(
            Arc::new(HashEmbeddingBackend::new(32)),
            &EmbeddingConfig {
                dimension: 32,
                ..Default::default()
            },
            limiters.clone(),
        ));
        let vector = Arc::new(VectorIndex::new(32));
        let lexical = Arc::new(LexicalIndex::new());

        let text = "Machine learning enables systems to learn.";
        let mut emb = embedding.embed_one(text).await.unwrap();
        crate::utils::similarity::l2_normalize(&mut emb);
        let chunk = IndexedChunk {
            doc_id: Uuid::new_v4(),
            chunk_index: 0,
            filename: "gone.txt".to_string(),
            organization_id: "orgA".to_string(),
            text: text.to_string(),
            chunk_start: 0,
            chunk_end: text.len(),
            token_count: 7,
            embedding: emb,
            uploaded_at: chrono::Utc::now(),
        };
        vector.upsert(vec![chunk.clone()]).unwrap();
        lexical.index(&[chunk]);

        let service = RetrievalService::new(
            embedding,
            vector,
            lexical,
            Arc::new(store),
            limiters,
        );

        let view = PermissionView {
            organization_id: "orgA".to_string(),
            allow_all: true,
            allowed_filenames: Default::default(),
        };
        let retrieval = service
            .retrieve(
                "machine learning",
                &view,
                &RetrievalOptions {
                    min_fused_score: 0.0,
                    enrichment_threshold: 0.0,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // the store failure degrades to a missing field, never an error
        assert!(!retrieval.results.is_empty());
        assert!(retrieval.results[0].full_file_content.is_none());
    }

    #[test]
    fn lexical_excerpt_is_preferred() {
        let doc = Uuid::new_v4();
        let opts = RetrievalOptions {
            min_fused_score: 0.0,
            ..Default::default()
        };
        let ranked = fuse(
            &[dense(doc, 0, "a.txt", 0.9)],
            &[lexical(doc, 0, "a.txt", 5.0)],
            "q",
            &opts,
        );
        assert_eq!(ranked[0].0.excerpt.as_deref(), Some("«match» 0"));
    }
}
