use super::{ChunkKey, DocFilter, IndexedChunk};
use crate::utils::similarity::unit_dot_score;
use anyhow::Result;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// One dense match. `score` is cosine similarity clipped to [0, 1].
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub key: ChunkKey,
    pub doc_id: Uuid,
    pub chunk_index: u32,
    pub filename: String,
    pub organization_id: String,
    pub score: f32,
    pub text: String,
}

struct HeapEntry {
    score: f32,
    key: ChunkKey,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap over score so the heap root is the weakest kept hit.
        // Key order breaks ties deterministically.
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.key.cmp(&other.key))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-process dense index: exhaustive cosine scan with a bounded heap.
/// Chunks are pre-normalized at embed time, so the dot product is the
/// cosine; top-k is computed over the filtered subset, never filtered
/// after the fact.
pub struct VectorIndex {
    dimension: usize,
    inner: RwLock<HashMap<ChunkKey, Arc<IndexedChunk>>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn upsert(&self, chunks: Vec<IndexedChunk>) -> Result<()> {
        for chunk in &chunks {
            if chunk.embedding.len() != self.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch: expected {}, got {} for {}",
                    self.dimension,
                    chunk.embedding.len(),
                    chunk.key()
                );
            }
        }

        let mut inner = self.inner.write();
        for chunk in chunks {
            inner.insert(chunk.key(), Arc::new(chunk));
        }
        Ok(())
    }

    pub fn knn(&self, query: &[f32], k: usize, filter: &DocFilter) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            anyhow::bail!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            );
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);

        for (key, chunk) in inner.iter() {
            if !filter.matches_chunk(chunk) {
                continue;
            }
            let score = unit_dot_score(query, &chunk.embedding);

            heap.push(HeapEntry { score, key: *key });
            if heap.len() > k {
                heap.pop();
            }
        }

        let mut entries: Vec<HeapEntry> = heap.into_vec();
        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let chunk = inner.get(&entry.key)?;
                Some(VectorHit {
                    key: entry.key,
                    doc_id: chunk.doc_id,
                    chunk_index: chunk.chunk_index,
                    filename: chunk.filename.clone(),
                    organization_id: chunk.organization_id.clone(),
                    score: entry.score,
                    text: chunk.text.clone(),
                })
            })
            .collect())
    }

    pub fn delete(&self, filter: &DocFilter) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, chunk| !filter.matches_chunk(chunk));
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::similarity::l2_normalize;
    use chrono::Utc;

    fn chunk(org: &str, filename: &str, doc_id: Uuid, index: u32, emb: Vec<f32>) -> IndexedChunk {
        let mut embedding = emb;
        l2_normalize(&mut embedding);
        IndexedChunk {
            doc_id,
            chunk_index: index,
            filename: filename.to_string(),
            organization_id: org.to_string(),
            text: format!("{} chunk {}", filename, index),
            chunk_start: 0,
            chunk_end: 0,
            token_count: 3,
            embedding,
            uploaded_at: Utc::now(),
        }
    }

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn knn_orders_by_similarity() {
        let index = VectorIndex::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .upsert(vec![
                chunk("orgA", "a.txt", a, 0, vec![1.0, 0.0, 0.0, 0.0]),
                chunk("orgA", "b.txt", b, 0, vec![0.8, 0.6, 0.0, 0.0]),
            ])
            .unwrap();

        let hits = index.knn(&unit(4, 0), 2, &DocFilter::org("orgA")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].doc_id, a);
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn topk_computed_over_filtered_subset() {
        let index = VectorIndex::new(2);
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        // The best match overall belongs to orgB; the filter must still
        // return orgA's weaker chunk rather than an empty page.
        index
            .upsert(vec![
                chunk("orgB", "best.txt", near, 0, vec![1.0, 0.0]),
                chunk("orgA", "ok.txt", far, 0, vec![0.6, 0.8]),
            ])
            .unwrap();

        let hits = index.knn(&[1.0, 0.0], 1, &DocFilter::org("orgA")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, far);
    }

    #[test]
    fn negative_similarity_clamps_to_zero() {
        let index = VectorIndex::new(2);
        let doc = Uuid::new_v4();
        index
            .upsert(vec![chunk("orgA", "a.txt", doc, 0, vec![-1.0, 0.0])])
            .unwrap();

        let hits = index.knn(&[1.0, 0.0], 1, &DocFilter::org("orgA")).unwrap();
        assert_eq!(hits[0].score, 0.0);
    }

    #[test]
    fn upsert_replaces_same_key() {
        let index = VectorIndex::new(2);
        let doc = Uuid::new_v4();
        index
            .upsert(vec![chunk("orgA", "a.txt", doc, 0, vec![1.0, 0.0])])
            .unwrap();
        index
            .upsert(vec![chunk("orgA", "a.txt", doc, 0, vec![0.0, 1.0])])
            .unwrap();

        assert_eq!(index.len(), 1);
        let hits = index.knn(&[0.0, 1.0], 1, &DocFilter::org("orgA")).unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn delete_by_filter_is_idempotent() {
        let index = VectorIndex::new(2);
        let doc = Uuid::new_v4();
        index
            .upsert(vec![
                chunk("orgA", "a.txt", doc, 0, vec![1.0, 0.0]),
                chunk("orgA", "a.txt", doc, 1, vec![0.0, 1.0]),
            ])
            .unwrap();

        assert_eq!(index.delete(&DocFilter::org("orgA").with_doc(doc)), 2);
        assert_eq!(index.delete(&DocFilter::org("orgA").with_doc(doc)), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = VectorIndex::new(4);
        let doc = Uuid::new_v4();
        assert!(index
            .upsert(vec![chunk("orgA", "a.txt", doc, 0, vec![1.0, 0.0])])
            .is_err());
        assert!(index.knn(&[1.0, 0.0], 1, &DocFilter::org("orgA")).is_err());
    }
}
