//! Completion provider abstraction
//!
//! The LLM capability behind query expansion and reranking. Vendor SDK
//! plumbing lives outside this crate; implementations are registered by
//! name and resolved once at startup. Streaming providers buffer to
//! completion before returning.

use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CompletionError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Completion failed: {0}")]
    RequestFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Parameters for one completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Trait for LLM completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one prompt to completion and return the full text
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;

    /// Model identifier reported in logs and job records
    fn model_name(&self) -> &str;

    /// Provider name used as the registry key
    fn provider_name(&self) -> &str;
}

/// Registry of completion providers keyed by provider name
#[derive(Default)]
pub struct CompletionRegistry {
    providers: AHashMap<String, Arc<dyn CompletionProvider>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        self.providers
            .insert(provider.provider_name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CompletionProvider>, CompletionError> {
        self.get(name).ok_or_else(|| {
            CompletionError::Unavailable(format!(
                "No completion provider registered as '{}'",
                name
            ))
        })
    }
}
