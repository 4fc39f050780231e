use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Document metadata as listed and denormalized onto chunks.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentRecord {
    pub doc_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub organization_id: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Metadata plus the raw uploaded bytes.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub record: DocumentRecord,
    pub content: Vec<u8>,
}

/// User role within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Owner,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Owner => "owner",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin | Self::Owner)
    }
}

/// One active session row. `token_digest` is the SHA-256 of the opaque
/// session token handed to the client.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token_digest: String,
    pub user_id: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub allowed_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn role_round_trip() {
        for role in [Role::Admin, Role::Owner, Role::Member] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn privileged_roles() {
        assert!(Role::Admin.is_privileged());
        assert!(Role::Owner.is_privileged());
        assert!(!Role::Member.is_privileged());
    }

    #[test]
    fn session_expiry() {
        let now = Utc::now();
        let record = SessionRecord {
            token_digest: "d".into(),
            user_id: "u".into(),
            role: Role::Member,
            organization_id: Some("orgA".into()),
            allowed_files: vec![],
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::hours(24),
        };
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::hours(25)));
    }
}
