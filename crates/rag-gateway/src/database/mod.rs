pub mod memory;
pub mod models;
pub mod pool;
pub mod repository;

pub use memory::MemoryStore;
pub use models::*;
pub use pool::DbPool;
pub use repository::Repository;

use crate::utils::error::ApiError;
use uuid::Uuid;

/// Relational document store (C3). Every operation is organization-scoped;
/// an empty organization id is a programmer error caught in debug builds.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(
        &self,
        filename: &str,
        file_type: &str,
        content: Vec<u8>,
        organization_id: &str,
    ) -> Result<Uuid, ApiError>;

    async fn get(&self, doc_id: Uuid, organization_id: &str) -> Result<StoredDocument, ApiError>;

    async fn get_by_filename(
        &self,
        filename: &str,
        organization_id: &str,
    ) -> Result<StoredDocument, ApiError>;

    async fn list(&self, organization_id: &str) -> Result<Vec<DocumentRecord>, ApiError>;

    /// Returns the number of rows removed: 1, or 0 when nothing matched
    /// (deleting twice is not an error).
    async fn delete(&self, doc_id: Uuid, organization_id: &str) -> Result<u64, ApiError>;
}

/// Session persistence for the auth gate (C11). Keys are SHA-256 digests of
/// the opaque session token; raw tokens are never stored.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(&self, record: SessionRecord) -> Result<(), ApiError>;

    async fn find(&self, token_digest: &str) -> Result<Option<SessionRecord>, ApiError>;

    async fn touch(
        &self,
        token_digest: &str,
        last_activity: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), ApiError>;

    async fn remove(&self, token_digest: &str) -> Result<(), ApiError>;

    async fn remove_expired(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64, ApiError>;
}
