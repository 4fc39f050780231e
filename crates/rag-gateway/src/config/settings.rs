use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub indexing: IndexingConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutsConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Empty selects the in-process store.
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_max_size: 10,
            pool_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub session_ttl_hours: i64,
    /// Provisioned users; registration is out of scope.
    pub users: Vec<UserConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24,
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UserConfig {
    pub username: String,
    /// Argon2 PHC string, computed out of band.
    pub password_hash: String,
    pub role: String,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub allowed_files: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Empty selects the deterministic in-process backend.
    pub base_url: String,
    pub dimension: usize,
    pub api_key: Option<String>,
    pub cache_capacity: usize,
    pub cache_ttl_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            base_url: String::new(),
            dimension: 384,
            api_key: None,
            cache_capacity: 10_000,
            cache_ttl_seconds: 3600,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub providers: Vec<LlmProviderConfig>,
    /// Ordered failover list; names must match `providers[].name`.
    pub provider_preference: Vec<String>,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            provider_preference: Vec::new(),
            timeout_seconds: 120,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmProviderConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub k: usize,
    pub dense_weight: f32,
    pub lexical_weight: f32,
    pub min_fused_score: f32,
    pub enrichment_threshold: f32,
    pub include_full_file: bool,
    /// "weighted" or "rrf"
    pub fusion_method: String,
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 10,
            dense_weight: 0.7,
            lexical_weight: 0.3,
            min_fused_score: 0.2,
            enrichment_threshold: 0.5,
            include_full_file: true,
            fusion_method: "weighted".to_string(),
            max_context_tokens: 6000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    pub max_concurrent_ingests: usize,
    pub target_chunk_tokens: usize,
    pub token_overlap: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_ingests: 16,
            target_chunk_tokens: 512,
            token_overlap: 128,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub search_concurrency: usize,
    pub llm_generate_concurrency: usize,
    pub llm_stream_concurrency: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            embedding_concurrency: 8,
            search_concurrency: 16,
            llm_generate_concurrency: 4,
            llm_stream_concurrency: 4,
            acquire_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub query_seconds: u64,
    pub ingest_seconds: u64,
    pub reindex_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            query_seconds: 60,
            ingest_seconds: 300,
            reindex_seconds: 1800,
        }
    }
}

/// Remote index endpoints, reserved for external backends. The in-process
/// indices ignore them.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub vector_url: Option<String>,
    pub lexical_url: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Deployment environment variables take precedence over the layered
    /// configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LLM_PROVIDER_PREFERENCE") {
            self.llm.provider_preference = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL_ID") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_DIM") {
            if let Ok(dim) = v.parse() {
                self.embedding.dimension = dim;
            }
        }
        if let Ok(v) = std::env::var("VECTOR_INDEX_URL") {
            self.index.vector_url = Some(v);
        }
        if let Ok(v) = std::env::var("LEXICAL_INDEX_URL") {
            self.index.lexical_url = Some(v);
        }
        if let Ok(v) = std::env::var("DOC_STORE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("SESSION_TTL_HOURS") {
            if let Ok(hours) = v.parse() {
                self.auth.session_ttl_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_INGESTS") {
            if let Ok(n) = v.parse() {
                self.indexing.max_concurrent_ingests = n;
            }
        }
        if let Ok(v) = std::env::var("ENRICHMENT_THRESHOLD") {
            if let Ok(t) = v.parse() {
                self.retrieval.enrichment_threshold = t;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_contract() {
        let settings = Settings::default();
        assert_eq!(settings.auth.session_ttl_hours, 24);
        assert_eq!(settings.indexing.max_concurrent_ingests, 16);
        assert_eq!(settings.retrieval.enrichment_threshold, 0.5);
        assert_eq!(settings.retrieval.k, 10);
        assert_eq!(settings.retrieval.dense_weight, 0.7);
        assert_eq!(settings.retrieval.lexical_weight, 0.3);
        assert_eq!(settings.embedding.dimension, 384);
        assert_eq!(settings.timeouts.query_seconds, 60);
        assert_eq!(settings.timeouts.ingest_seconds, 300);
        assert_eq!(settings.timeouts.reindex_seconds, 1800);
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = Settings::default();
        std::env::set_var("ENRICHMENT_THRESHOLD", "0.75");
        std::env::set_var("LLM_PROVIDER_PREFERENCE", "primary, backup");
        settings.apply_env_overrides();
        std::env::remove_var("ENRICHMENT_THRESHOLD");
        std::env::remove_var("LLM_PROVIDER_PREFERENCE");

        assert_eq!(settings.retrieval.enrichment_threshold, 0.75);
        assert_eq!(settings.llm.provider_preference, vec!["primary", "backup"]);
    }
}
