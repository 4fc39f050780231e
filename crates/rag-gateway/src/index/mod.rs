pub mod analyzer;
pub mod lexical;
pub mod vector;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Identity of one retrievable chunk: `(doc_id, chunk_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChunkKey {
    pub doc_id: Uuid,
    pub chunk_index: u32,
}

impl ChunkKey {
    pub fn new(doc_id: Uuid, chunk_index: u32) -> Self {
        Self { doc_id, chunk_index }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.doc_id, self.chunk_index)
    }
}

/// One chunk as both indices store it. `text` keeps the original form for
/// display; the lexical index analyzes it on insert.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub doc_id: Uuid,
    pub chunk_index: u32,
    pub filename: String,
    pub organization_id: String,
    pub text: String,
    pub chunk_start: usize,
    pub chunk_end: usize,
    pub token_count: usize,
    pub embedding: Vec<f32>,
    pub uploaded_at: DateTime<Utc>,
}

impl IndexedChunk {
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.doc_id, self.chunk_index)
    }
}

/// Metadata predicate for index reads and writes. The organization scope is
/// mandatory; a filter cannot be built without it.
#[derive(Debug, Clone)]
pub struct DocFilter {
    pub organization_id: String,
    pub filenames: Option<HashSet<String>>,
    pub doc_id: Option<Uuid>,
}

impl DocFilter {
    pub fn org(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            filenames: None,
            doc_id: None,
        }
    }

    pub fn with_doc(mut self, doc_id: Uuid) -> Self {
        self.doc_id = Some(doc_id);
        self
    }

    pub fn with_filenames(mut self, filenames: HashSet<String>) -> Self {
        self.filenames = Some(filenames);
        self
    }

    pub fn matches(&self, organization_id: &str, filename: &str, doc_id: Uuid) -> bool {
        if organization_id != self.organization_id {
            return false;
        }
        if let Some(id) = self.doc_id {
            if id != doc_id {
                return false;
            }
        }
        if let Some(allowed) = &self.filenames {
            if !allowed.contains(filename) {
                return false;
            }
        }
        true
    }

    pub fn matches_chunk(&self, chunk: &IndexedChunk) -> bool {
        self.matches(&chunk.organization_id, &chunk.filename, chunk.doc_id)
    }
}
