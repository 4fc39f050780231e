use super::{DocumentRecord, DocumentStore, SessionRecord, SessionStore, StoredDocument};
use crate::utils::error::ApiError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

/// In-process store implementing the same contracts as the Postgres
/// repository. Selected when no database URL is configured; also what the
/// test suite runs against.
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<Uuid, StoredDocument>,
    sessions: DashMap<String, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(
        &self,
        filename: &str,
        file_type: &str,
        content: Vec<u8>,
        organization_id: &str,
    ) -> Result<Uuid, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document insert without org scope");

        let doc_id = Uuid::new_v4();
        let record = DocumentRecord {
            doc_id,
            filename: filename.to_string(),
            file_type: file_type.to_string(),
            organization_id: organization_id.to_string(),
            size_bytes: content.len() as i64,
            uploaded_at: Utc::now(),
        };
        self.documents.insert(doc_id, StoredDocument { record, content });

        debug!("Inserted document {} ({}) for org {}", doc_id, filename, organization_id);
        Ok(doc_id)
    }

    async fn get(&self, doc_id: Uuid, organization_id: &str) -> Result<StoredDocument, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document get without org scope");

        self.documents
            .get(&doc_id)
            .filter(|doc| doc.record.organization_id == organization_id)
            .map(|doc| doc.clone())
            .ok_or_else(|| ApiError::NotFound(format!("document {}", doc_id)))
    }

    async fn get_by_filename(
        &self,
        filename: &str,
        organization_id: &str,
    ) -> Result<StoredDocument, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document lookup without org scope");

        self.documents
            .iter()
            .filter(|entry| {
                entry.record.filename == filename
                    && entry.record.organization_id == organization_id
            })
            .max_by_key(|entry| entry.record.uploaded_at)
            .map(|entry| entry.clone())
            .ok_or_else(|| ApiError::NotFound(format!("document '{}'", filename)))
    }

    async fn list(&self, organization_id: &str) -> Result<Vec<DocumentRecord>, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document list without org scope");

        let mut records: Vec<DocumentRecord> = self
            .documents
            .iter()
            .filter(|entry| entry.record.organization_id == organization_id)
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(records)
    }

    async fn delete(&self, doc_id: Uuid, organization_id: &str) -> Result<u64, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document delete without org scope");

        let removed = self
            .documents
            .remove_if(&doc_id, |_, doc| doc.record.organization_id == organization_id);

        Ok(u64::from(removed.is_some()))
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, record: SessionRecord) -> Result<(), ApiError> {
        self.sessions.insert(record.token_digest.clone(), record);
        Ok(())
    }

    async fn find(&self, token_digest: &str) -> Result<Option<SessionRecord>, ApiError> {
        Ok(self.sessions.get(token_digest).map(|r| r.clone()))
    }

    async fn touch(
        &self,
        token_digest: &str,
        last_activity: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        if let Some(mut record) = self.sessions.get_mut(token_digest) {
            record.last_activity = last_activity;
        }
        Ok(())
    }

    async fn remove(&self, token_digest: &str) -> Result<(), ApiError> {
        self.sessions.remove(token_digest);
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| !record.is_expired(now));
        Ok((before - self.sessions.len()) as u64)
    }
}
