//! Embedding generation: provider abstraction and content-addressed caching

mod cache;
mod provider;

pub use cache::{CacheStats, EmbeddingCache};
pub use provider::{EmbeddingError, EmbeddingProvider, EmbeddingRegistry, FastEmbedProvider};
