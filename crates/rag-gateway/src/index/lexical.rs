use super::analyzer;
use super::{ChunkKey, DocFilter, IndexedChunk};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

pub const BM25_K1: f32 = 1.5;
pub const BM25_B: f32 = 0.75;

const HIGHLIGHT_OPEN: &str = "«";
const HIGHLIGHT_CLOSE: &str = "»";
const EXCERPT_CAP_BYTES: usize = 240;

/// One lexical match. `score` is the raw BM25 value; per-query normalization
/// happens at fusion time.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub key: ChunkKey,
    pub doc_id: Uuid,
    pub chunk_index: u32,
    pub filename: String,
    pub organization_id: String,
    pub score: f32,
    pub excerpt: String,
    pub text: String,
}

struct StoredChunk {
    doc_id: Uuid,
    chunk_index: u32,
    filename: String,
    organization_id: String,
    content: String,
    /// Analyzed token count; the BM25 document length.
    dl: u32,
}

impl StoredChunk {
    fn matches(&self, filter: &DocFilter) -> bool {
        filter.matches(&self.organization_id, &self.filename, self.doc_id)
    }
}

#[derive(Default)]
struct Inner {
    /// term -> chunk -> term frequency
    postings: HashMap<String, HashMap<ChunkKey, u32>>,
    chunks: HashMap<ChunkKey, StoredChunk>,
}

/// In-process inverted index with BM25 scoring, highlighting, autocomplete
/// and facet counts. All operations take a metadata filter; scoring statistics
/// (N, df, avgdl) are computed over the filtered subset so that top-k is
/// correct under tenancy filters.
pub struct LexicalIndex {
    inner: RwLock<Inner>,
}

impl Default for LexicalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn index(&self, chunks: &[IndexedChunk]) {
        let mut inner = self.inner.write();
        for chunk in chunks {
            let key = chunk.key();
            Self::remove_postings(&mut inner, key);

            let terms = analyzer::analyze(&chunk.text);
            let dl = terms.len() as u32;
            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *tf.entry(term).or_insert(0) += 1;
            }
            for (term, count) in tf {
                inner.postings.entry(term).or_default().insert(key, count);
            }

            inner.chunks.insert(
                key,
                StoredChunk {
                    doc_id: chunk.doc_id,
                    chunk_index: chunk.chunk_index,
                    filename: chunk.filename.clone(),
                    organization_id: chunk.organization_id.clone(),
                    content: chunk.text.clone(),
                    dl,
                },
            );
        }
    }

    pub fn delete(&self, filter: &DocFilter) -> usize {
        let mut inner = self.inner.write();
        let keys: Vec<ChunkKey> = inner
            .chunks
            .iter()
            .filter(|(_, c)| c.matches(filter))
            .map(|(k, _)| *k)
            .collect();

        for key in &keys {
            Self::remove_postings(&mut inner, *key);
            inner.chunks.remove(key);
        }

        keys.len()
    }

    /// The analyzer is deterministic, so re-analyzing the stored content
    /// recovers exactly the terms that were posted for this chunk.
    fn remove_postings(inner: &mut Inner, key: ChunkKey) {
        let Some(existing) = inner.chunks.get(&key) else {
            return;
        };
        let terms: HashSet<String> = analyzer::analyze(&existing.content).into_iter().collect();
        for term in terms {
            if let Some(posting) = inner.postings.get_mut(&term) {
                posting.remove(&key);
                if posting.is_empty() {
                    inner.postings.remove(&term);
                }
            }
        }
    }

    pub fn search(
        &self,
        query: &str,
        k: usize,
        filter: &DocFilter,
        highlight: bool,
    ) -> Vec<LexicalHit> {
        let query_terms = analyzer::analyze(query);
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let inner = self.inner.read();

        // Corpus statistics over the filtered subset only.
        let mut n_docs: u32 = 0;
        let mut total_dl: u64 = 0;
        for chunk in inner.chunks.values() {
            if chunk.matches(filter) {
                n_docs += 1;
                total_dl += u64::from(chunk.dl);
            }
        }
        if n_docs == 0 {
            return Vec::new();
        }
        let avg_dl = total_dl as f32 / n_docs as f32;

        // Fuzziness AUTO applies to single-token queries only.
        let match_terms: BTreeSet<String> = if query_terms.len() == 1 {
            Self::expand_fuzzy(&inner, &query_terms[0])
        } else {
            query_terms.iter().cloned().collect()
        };

        let mut scores: HashMap<ChunkKey, f32> = HashMap::new();
        for term in &match_terms {
            let Some(posting) = inner.postings.get(term) else {
                continue;
            };

            let df = posting
                .keys()
                .filter(|key| inner.chunks.get(key).is_some_and(|c| c.matches(filter)))
                .count() as f32;
            if df == 0.0 {
                continue;
            }

            let idf = ((n_docs as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (key, &tf) in posting {
                let Some(chunk) = inner.chunks.get(key) else {
                    continue;
                };
                if !chunk.matches(filter) {
                    continue;
                }
                let tf = tf as f32;
                let dl = chunk.dl as f32;
                let norm = tf * (BM25_K1 + 1.0)
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avg_dl));
                *scores.entry(*key).or_insert(0.0) += idf * norm;
            }
        }

        let mut ranked: Vec<(ChunkKey, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .filter_map(|(key, score)| {
                let chunk = inner.chunks.get(&key)?;
                let excerpt = if highlight {
                    build_excerpt(&chunk.content, &match_terms, EXCERPT_CAP_BYTES)
                } else {
                    truncate_at_boundary(&chunk.content, EXCERPT_CAP_BYTES).to_string()
                };
                Some(LexicalHit {
                    key,
                    doc_id: chunk.doc_id,
                    chunk_index: chunk.chunk_index,
                    filename: chunk.filename.clone(),
                    organization_id: chunk.organization_id.clone(),
                    score,
                    excerpt,
                    text: chunk.content.clone(),
                })
            })
            .collect()
    }

    fn expand_fuzzy(inner: &Inner, term: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.insert(term.to_string());
        for vocab in inner.postings.keys() {
            if analyzer::fuzzy_match(term, vocab) {
                out.insert(vocab.clone());
            }
        }
        out
    }

    /// Best-effort autocomplete over the vocabulary visible to one org.
    pub fn suggest(&self, prefix: &str, organization_id: &str, limit: usize) -> Vec<String> {
        let prefix = prefix.to_lowercase();
        if prefix.is_empty() {
            return Vec::new();
        }

        let inner = self.inner.read();
        let mut out: BTreeSet<String> = BTreeSet::new();
        for (term, posting) in &inner.postings {
            if !term.starts_with(&prefix) {
                continue;
            }
            let visible = posting.keys().any(|key| {
                inner
                    .chunks
                    .get(key)
                    .is_some_and(|c| c.organization_id == organization_id)
            });
            if visible {
                out.insert(term.clone());
            }
            if out.len() >= limit * 4 {
                break;
            }
        }
        out.into_iter().take(limit).collect()
    }

    /// Facet value counts over the filtered subset. Supported fields:
    /// `filename`, `doc_id`.
    pub fn facets(
        &self,
        filter: &DocFilter,
        fields: &[String],
    ) -> HashMap<String, HashMap<String, u64>> {
        let inner = self.inner.read();
        let mut out: HashMap<String, HashMap<String, u64>> = HashMap::new();

        for field in fields {
            let counts = out.entry(field.clone()).or_default();
            for chunk in inner.chunks.values() {
                if !chunk.matches(filter) {
                    continue;
                }
                let value = match field.as_str() {
                    "filename" => chunk.filename.clone(),
                    "doc_id" => chunk.doc_id.to_string(),
                    _ => continue,
                };
                *counts.entry(value).or_insert(0) += 1;
            }
        }

        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn truncate_at_boundary(s: &str, cap: usize) -> &str {
    &s[..floor_char_boundary(s, cap)]
}

/// Build an excerpt of at most `cap` content bytes around the first matched
/// term, wrapping every matched token in `«` / `»`.
fn build_excerpt(content: &str, terms: &BTreeSet<String>, cap: usize) -> String {
    let spans = analyzer::token_spans(content);
    let matched: Vec<&(String, usize, usize)> =
        spans.iter().filter(|(tok, _, _)| terms.contains(tok)).collect();

    let window_start = match matched.first() {
        Some((_, start, _)) => {
            // Back off roughly a quarter of the cap for leading context.
            let back = start.saturating_sub(cap / 4);
            // Snap forward to a token start so the excerpt begins on a word.
            spans
                .iter()
                .find(|(_, s, _)| *s >= back)
                .map(|(_, s, _)| *s)
                .unwrap_or(0)
        }
        None => 0,
    };
    let window_start = floor_char_boundary(content, window_start);
    let window_end = floor_char_boundary(content, window_start + cap);

    let mut out = String::with_capacity(cap + 16);
    if window_start > 0 {
        out.push('…');
    }

    let mut cursor = window_start;
    for (tok, start, end) in &spans {
        if *end <= window_start || *start >= window_end {
            continue;
        }
        if !terms.contains(tok) {
            continue;
        }
        let start = (*start).max(window_start);
        let end = (*end).min(window_end);
        out.push_str(&content[cursor..start]);
        out.push_str(HIGHLIGHT_OPEN);
        out.push_str(&content[start..end]);
        out.push_str(HIGHLIGHT_CLOSE);
        cursor = end;
    }
    out.push_str(&content[cursor..window_end]);

    if window_end < content.len() {
        out.push('…');
    }

    out
}
