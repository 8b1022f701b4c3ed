//! Vector backend contract
//!
//! Two physical backends sit behind the façade; both speak this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("Vector backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Vector backend '{backend}' timed out")]
    Timeout { backend: String },

    #[error("All vector backends failed: {0}")]
    AllBackendsFailed(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

impl VectorStoreError {
    pub fn backend(backend: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}

/// A chunk's vector-searchable projection, the upsert unit
#[derive(Debug, Clone)]
pub struct VectorChunk {
    pub chunk_id: i64,
    pub note_id: String,
    pub user_id: String,
    pub embedding: Vec<f32>,
    pub snapshot_updated_at: DateTime<Utc>,
}

/// One search result from a backend
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub note_id: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name used in degradation logs
    fn name(&self) -> &str;

    async fn upsert_batch(&self, chunks: &[VectorChunk]) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError>;

    async fn delete_by_note(&self, note_id: &str) -> Result<usize, VectorStoreError>;

    async fn delete_by_user(&self, user_id: &str) -> Result<usize, VectorStoreError>;

    /// Snapshot timestamps of the notes this backend has indexed for a user
    async fn indexed_note_timestamps(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, VectorStoreError>;
}

/// Cosine similarity over two equal-length vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
