//! Configuration management for recollect
//!
//! Loading, validation and env-override handling for the retrieval engine,
//! following a single TOML file with one section per subsystem.

use crate::error::{RecollectError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

/// Chunking policy: what unit the target size and overlap are measured in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    Characters,
    Words,
}

/// Chunker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub unit: ChunkUnit,
    pub target_size: usize,
    pub overlap: usize,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
    /// Total byte budget for the embedding cache
    pub cache_max_bytes: usize,
}

/// LLM configuration (query expansion and reranking)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Indexing orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Maximum notes processed concurrently within one job
    pub max_concurrent_notes: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_search: usize,
}

/// Scale the reranker asks the LLM to score on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankScale {
    ZeroToTen,
    UnitInterval,
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Final number of results returned to the caller
    pub top_k: usize,
    /// Per-channel over-fetch multiplier before fusion
    pub search_multiplier: usize,
    /// Candidates fed to the reranker
    pub initial_retrieval_count: usize,
    pub rrf_k: f32,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub min_similarity_threshold: f32,
    pub enable_hybrid: bool,
    pub enable_hyde: bool,
    pub enable_multi_query: bool,
    pub multi_query_count: usize,
    pub enable_reranking: bool,
    pub min_rerank_score: f32,
    pub rerank_scale: RerankScale,
    /// Overall deadline for one retrieve() call, milliseconds
    pub query_timeout_ms: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RecollectError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RecollectError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecollectError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RecollectError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: RECOLLECT_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("RECOLLECT_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
            value.parse().map_err(|_| {
                RecollectError::Config(format!("Cannot parse '{}' for {}", value, path))
            })
        }

        match path {
            "LLM__ENABLED" => self.llm.enabled = parse(path, value)?,
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse(path, value)?,
            "RETRIEVAL__ENABLE_HYDE" => self.retrieval.enable_hyde = parse(path, value)?,
            "RETRIEVAL__ENABLE_MULTI_QUERY" => {
                self.retrieval.enable_multi_query = parse(path, value)?
            }
            "RETRIEVAL__ENABLE_RERANKING" => self.retrieval.enable_reranking = parse(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| RecollectError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("recollect").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| RecollectError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".recollect"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("~/.recollect"),
            },
            chunking: ChunkingConfig {
                unit: ChunkUnit::Characters,
                target_size: 1200,
                overlap: 200,
            },
            embedding: EmbeddingConfig {
                provider: "fastembed".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
                cache_max_bytes: 64 * 1024 * 1024,
            },
            llm: LlmConfig {
                enabled: false,
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 512,
                temperature: 0.3,
            },
            indexing: IndexingConfig {
                max_concurrent_notes: 4,
                hnsw_ef_construction: 200,
                hnsw_m: 16,
                hnsw_ef_search: 64,
            },
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            search_multiplier: 3,
            initial_retrieval_count: 20,
            rrf_k: 60.0,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
            min_similarity_threshold: 0.0,
            enable_hybrid: true,
            enable_hyde: false,
            enable_multi_query: false,
            multi_query_count: 3,
            enable_reranking: false,
            min_rerank_score: 0.3,
            rerank_scale: RerankScale::ZeroToTen,
            query_timeout_ms: 30_000,
        }
    }
}
