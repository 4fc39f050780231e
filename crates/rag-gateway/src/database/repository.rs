use super::{DbPool, DocumentRecord, DocumentStore, Role, SessionRecord, SessionStore, StoredDocument};
use crate::utils::error::ApiError;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::debug;
use uuid::Uuid;

/// Postgres-backed document and session store.
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Schema bootstrap; every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS documents (
                doc_id UUID PRIMARY KEY,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                content BYTEA NOT NULL,
                organization_id TEXT NOT NULL,
                uploaded_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_documents_org_filename
               ON documents (organization_id, filename)"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                organization_id TEXT,
                allowed_files JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                last_activity TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS query_events (
                query_id UUID PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer_length INT NOT NULL,
                response_time_ms BIGINT NOT NULL,
                source_chunk_ids JSONB NOT NULL,
                humanized BOOLEAN NOT NULL,
                success BOOLEAN NOT NULL,
                error_kind TEXT,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;

        debug!("Schema bootstrap complete");
        Ok(())
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct DocumentRow {
    doc_id: Uuid,
    filename: String,
    file_type: String,
    content: Vec<u8>,
    organization_id: String,
    uploaded_at: DateTime<Utc>,
}

impl From<DocumentRow> for StoredDocument {
    fn from(row: DocumentRow) -> Self {
        let size_bytes = row.content.len() as i64;
        StoredDocument {
            record: DocumentRecord {
                doc_id: row.doc_id,
                filename: row.filename,
                file_type: row.file_type,
                organization_id: row.organization_id,
                size_bytes,
                uploaded_at: row.uploaded_at,
            },
            content: row.content,
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for Repository {
    async fn insert(
        &self,
        filename: &str,
        file_type: &str,
        content: Vec<u8>,
        organization_id: &str,
    ) -> Result<Uuid, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document insert without org scope");

        let doc_id = Uuid::new_v4();
        sqlx::query(
            r#"INSERT INTO documents
               (doc_id, filename, file_type, content, organization_id, uploaded_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(doc_id)
        .bind(filename)
        .bind(file_type)
        .bind(&content)
        .bind(organization_id)
        .bind(Utc::now())
        .execute(self.pool.get_pool())
        .await?;

        debug!("Inserted document {} ({}) for org {}", doc_id, filename, organization_id);
        Ok(doc_id)
    }

    async fn get(&self, doc_id: Uuid, organization_id: &str) -> Result<StoredDocument, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document get without org scope");

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT doc_id, filename, file_type, content, organization_id, uploaded_at
               FROM documents
               WHERE doc_id = $1 AND organization_id = $2"#,
        )
        .bind(doc_id)
        .bind(organization_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(StoredDocument::from)
            .ok_or_else(|| ApiError::NotFound(format!("document {}", doc_id)))
    }

    async fn get_by_filename(
        &self,
        filename: &str,
        organization_id: &str,
    ) -> Result<StoredDocument, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document lookup without org scope");

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"SELECT doc_id, filename, file_type, content, organization_id, uploaded_at
               FROM documents
               WHERE filename = $1 AND organization_id = $2
               ORDER BY uploaded_at DESC
               LIMIT 1"#,
        )
        .bind(filename)
        .bind(organization_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        row.map(StoredDocument::from)
            .ok_or_else(|| ApiError::NotFound(format!("document '{}'", filename)))
    }

    async fn list(&self, organization_id: &str) -> Result<Vec<DocumentRecord>, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document list without org scope");

        let records = sqlx::query_as::<_, DocumentRecord>(
            r#"SELECT doc_id, filename, file_type, organization_id,
                      length(content)::bigint AS size_bytes, uploaded_at
               FROM documents
               WHERE organization_id = $1
               ORDER BY uploaded_at DESC"#,
        )
        .bind(organization_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(records)
    }

    async fn delete(&self, doc_id: Uuid, organization_id: &str) -> Result<u64, ApiError> {
        debug_assert!(!organization_id.is_empty(), "document delete without org scope");

        let result = sqlx::query(
            r#"DELETE FROM documents WHERE doc_id = $1 AND organization_id = $2"#,
        )
        .bind(doc_id)
        .bind(organization_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    user_id: String,
    role: String,
    organization_id: Option<String>,
    allowed_files: sqlx::types::Json<Vec<String>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            token_digest: row.session_id,
            user_id: row.user_id,
            role: Role::parse(&row.role).unwrap_or(Role::Member),
            organization_id: row.organization_id,
            allowed_files: row.allowed_files.0,
            created_at: row.created_at,
            last_activity: row.last_activity,
            expires_at: row.expires_at,
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for Repository {
    async fn put(&self, record: SessionRecord) -> Result<(), ApiError> {
        sqlx::query(
            r#"INSERT INTO sessions
               (session_id, user_id, role, organization_id, allowed_files,
                created_at, last_activity, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&record.token_digest)
        .bind(&record.user_id)
        .bind(record.role.as_str())
        .bind(&record.organization_id)
        .bind(sqlx::types::Json(&record.allowed_files))
        .bind(record.created_at)
        .bind(record.last_activity)
        .bind(record.expires_at)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    async fn find(&self, token_digest: &str) -> Result<Option<SessionRecord>, ApiError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"SELECT session_id, user_id, role, organization_id, allowed_files,
                      created_at, last_activity, expires_at
               FROM sessions
               WHERE session_id = $1"#,
        )
        .bind(token_digest)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row.map(SessionRecord::from))
    }

    async fn touch(
        &self,
        token_digest: &str,
        last_activity: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        sqlx::query(r#"UPDATE sessions SET last_activity = $2 WHERE session_id = $1"#)
            .bind(token_digest)
            .bind(last_activity)
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    async fn remove(&self, token_digest: &str) -> Result<(), ApiError> {
        sqlx::query(r#"DELETE FROM sessions WHERE session_id = $1"#)
            .bind(token_digest)
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<u64, ApiError> {
        let result = sqlx::query(r#"DELETE FROM sessions WHERE expires_at <= $1"#)
            .bind(now)
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected())
    }
}
