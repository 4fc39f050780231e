use crate::config::UserConfig;
use crate::database::{Role, SessionRecord, SessionStore};
use crate::utils::error::ApiError;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The authenticated identity attached to a request once its session token
/// resolves.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub allowed_files: Vec<String>,
    /// Digest of the session token; safe to use as a session identifier in
    /// logs and analytics.
    pub session_id: String,
}

/// Session/auth gate. Tokens are 256-bit random values handed to the client
/// once; the store only ever sees their SHA-256 digest, and lookups go
/// through that digest so resolution time does not depend on the token value.
pub struct SessionGate {
    store: Arc<dyn SessionStore>,
    users: Vec<UserConfig>,
    ttl: Duration,
}

impl SessionGate {
    pub fn new(store: Arc<dyn SessionStore>, users: Vec<UserConfig>, ttl_hours: i64) -> Self {
        Self {
            store,
            users,
            ttl: Duration::hours(ttl_hours.max(1)),
        }
    }

    fn digest(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Validate credentials against the provisioned directory and open a
    /// session. Returns the opaque token and the user's role.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(String, Role), ApiError> {
        let user = self
            .users
            .iter()
            .find(|u| u.username == username)
            .ok_or_else(|| ApiError::Unauthenticated("invalid credentials".to_string()))?;

        let parsed = PasswordHash::new(&user.password_hash)
            .map_err(|e| ApiError::Internal(format!("bad password hash for {}: {}", username, e)))?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| ApiError::Unauthenticated("invalid credentials".to_string()))?;

        let role = Role::parse(&user.role)
            .ok_or_else(|| ApiError::Internal(format!("unknown role '{}'", user.role)))?;

        let token_bytes: [u8; 32] = rand::random();
        let token = hex::encode(token_bytes);
        let now = Utc::now();

        self.store
            .put(SessionRecord {
                token_digest: Self::digest(&token),
                user_id: user.username.clone(),
                role,
                organization_id: user.organization_id.clone(),
                allowed_files: user.allowed_files.clone(),
                created_at: now,
                last_activity: now,
                expires_at: now + self.ttl,
            })
            .await?;

        info!("Session opened for user {} (role {})", username, role.as_str());
        Ok((token, role))
    }

    /// Resolve a session token into an identity. Expired sessions are
    /// deleted on access; live ones get their activity timestamp slid
    /// forward.
    pub async fn resolve(&self, token: &str) -> Result<AuthUser, ApiError> {
        let digest = Self::digest(token);

        let record = self
            .store
            .find(&digest)
            .await?
            .ok_or_else(|| ApiError::Unauthenticated("invalid session".to_string()))?;

        let now = Utc::now();
        if record.is_expired(now) {
            debug!("Session for user {} expired, removing", record.user_id);
            self.store.remove(&digest).await?;
            return Err(ApiError::Unauthenticated("session expired".to_string()));
        }

        self.store.touch(&digest, now).await?;

        Ok(AuthUser {
            user_id: record.user_id,
            role: record.role,
            organization_id: record.organization_id,
            allowed_files: record.allowed_files,
            session_id: digest,
        })
    }

    pub async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.store.remove(&Self::digest(token)).await
    }

    /// Periodic sweep; also safe to call ad hoc.
    pub async fn sweep_expired(&self) -> Result<u64, ApiError> {
        let swept = self.store.remove_expired(Utc::now()).await?;
        if swept > 0 {
            warn!("Swept {} expired sessions", swept);
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    fn gate(ttl_hours: i64) -> SessionGate {
        let users = vec![
            UserConfig {
                username: "alice".to_string(),
                password_hash: hash("wonderland"),
                role: "admin".to_string(),
                organization_id: Some("orgA".to_string()),
                allowed_files: vec![],
            },
            UserConfig {
                username: "mallory".to_string(),
                password_hash: hash("hunter2"),
                role: "member".to_string(),
                organization_id: None,
                allowed_files: vec!["public.md".to_string()],
            },
        ];
        SessionGate::new(Arc::new(MemoryStore::new()), users, ttl_hours)
    }

    #[tokio::test]
    async fn authenticate_then_resolve() {
        let gate = gate(24);
        let (token, role) = gate.authenticate("alice", "wonderland").await.unwrap();
        assert_eq!(role, Role::Admin);
        assert_eq!(token.len(), 64); // 32 bytes hex

        let user = gate.resolve(&token).await.unwrap();
        assert_eq!(user.user_id, "alice");
        assert_eq!(user.organization_id.as_deref(), Some("orgA"));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let gate = gate(24);
        let err = gate.authenticate("alice", "queen").await.unwrap_err();
        assert_eq!(err.kind(), "Unauthenticated");

        let err = gate.authenticate("nobody", "x").await.unwrap_err();
        assert_eq!(err.kind(), "Unauthenticated");
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let gate = gate(24);
        let err = gate.resolve("deadbeef").await.unwrap_err();
        assert_eq!(err.kind(), "Unauthenticated");
    }

    #[tokio::test]
    async fn logout_invalidates_session() {
        let gate = gate(24);
        let (token, _) = gate.authenticate("alice", "wonderland").await.unwrap();
        gate.logout(&token).await.unwrap();
        assert!(gate.resolve(&token).await.is_err());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let gate = gate(24);
        let (t1, _) = gate.authenticate("alice", "wonderland").await.unwrap();
        let (t2, _) = gate.authenticate("alice", "wonderland").await.unwrap();
        assert_ne!(t1, t2);
        gate.logout(&t1).await.unwrap();
        assert!(gate.resolve(&t2).await.is_ok());
    }
}
