//! Vector store façade
//!
//! Unifies the two physical vector backends behind one search/upsert
//! surface. Searches fan out to both backends concurrently and merge; a
//! single failing or slow backend degrades the call instead of failing it.
//! Writes go to both, and a write landing on only one side is reported as
//! partial, never dropped silently.

use crate::vector::backend::{VectorBackend, VectorChunk, VectorHit, VectorStoreError};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a write fanned out to both backends
#[derive(Debug)]
pub struct WriteOutcome {
    /// True when every backend accepted the write
    pub complete: bool,
    /// Per-backend failures for partial writes
    pub failures: Vec<VectorStoreError>,
}

impl WriteOutcome {
    fn from_results(results: Vec<Result<(), VectorStoreError>>) -> Result<Self, VectorStoreError> {
        let total = results.len();
        let failures: Vec<VectorStoreError> =
            results.into_iter().filter_map(Result::err).collect();

        if failures.len() == total {
            let combined = failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VectorStoreError::AllBackendsFailed(combined));
        }

        for failure in &failures {
            warn!("Partial vector write: {}", failure);
        }

        Ok(Self {
            complete: failures.is_empty(),
            failures,
        })
    }
}

pub struct VectorStoreFacade {
    backends: Vec<Arc<dyn VectorBackend>>,
    search_timeout: Duration,
}

impl VectorStoreFacade {
    pub fn new(backends: Vec<Arc<dyn VectorBackend>>, search_timeout: Duration) -> Self {
        Self {
            backends,
            search_timeout,
        }
    }

    /// Upsert to every backend; partial success is reported, total failure
    /// is an error
    pub async fn upsert_batch(&self, chunks: &[VectorChunk]) -> Result<WriteOutcome, VectorStoreError> {
        let results = join_all(
            self.backends
                .iter()
                .map(|backend| backend.upsert_batch(chunks)),
        )
        .await;

        WriteOutcome::from_results(results)
    }

    /// Search both backends concurrently, union the hits deduplicated by
    /// chunk id (keeping the higher score) and return the merged top-k
    pub async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let timeout = self.search_timeout;
        let searches = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            async move {
                let name = backend.name().to_string();
                match tokio::time::timeout(timeout, backend.search(query, user_id, top_k)).await
                {
                    Ok(result) => (name, result),
                    Err(_) => (
                        name.clone(),
                        Err(VectorStoreError::Timeout { backend: name }),
                    ),
                }
            }
        });

        let outcomes = join_all(searches).await;

        let mut merged: AHashMap<i64, VectorHit> = AHashMap::new();
        let mut survivors = 0usize;
        let mut errors = Vec::new();

        for (name, outcome) in outcomes {
            match outcome {
                Ok(hits) => {
                    survivors += 1;
                    debug!("Vector backend '{}' returned {} hits", name, hits.len());
                    for hit in hits {
                        merged
                            .entry(hit.chunk_id)
                            .and_modify(|existing| {
                                if hit.score > existing.score {
                                    existing.score = hit.score;
                                }
                            })
                            .or_insert(hit);
                    }
                }
                Err(e) => {
                    warn!("Vector backend '{}' degraded: {}", name, e);
                    errors.push(e);
                }
            }
        }

        if survivors == 0 {
            let combined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(VectorStoreError::AllBackendsFailed(combined));
        }

        let mut hits: Vec<VectorHit> = merged
            .into_values()
            .filter(|hit| hit.score >= similarity_threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    pub async fn delete_by_note(&self, note_id: &str) -> Result<WriteOutcome, VectorStoreError> {
        let results = join_all(
            self.backends
                .iter()
                .map(|backend| async move { backend.delete_by_note(note_id).await.map(|_| ()) }),
        )
        .await;

        WriteOutcome::from_results(results)
    }

    pub async fn delete_by_user(&self, user_id: &str) -> Result<WriteOutcome, VectorStoreError> {
        let results = join_all(
            self.backends
                .iter()
                .map(|backend| async move { backend.delete_by_user(user_id).await.map(|_| ()) }),
        )
        .await;

        WriteOutcome::from_results(results)
    }

    /// Note ids currently indexed for a user
    pub async fn indexed_note_ids(&self, user_id: &str) -> Result<HashSet<String>, VectorStoreError> {
        Ok(self
            .indexed_note_timestamps(user_id)
            .await?
            .into_keys()
            .collect())
    }

    /// Snapshot timestamps from the first backend that answers; the store
    /// of record backend is expected to be listed first
    pub async fn indexed_note_timestamps(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, VectorStoreError> {
        let mut last_error = None;
        for backend in &self.backends {
            match backend.indexed_note_timestamps(user_id).await {
                Ok(map) => return Ok(map),
                Err(e) => {
                    warn!("Vector backend '{}' degraded: {}", backend.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(VectorStoreError::AllBackendsFailed(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no backends configured".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Scripted backend: fixed hits, optional forced failure
    struct ScriptedBackend {
        name: String,
        hits: Vec<VectorHit>,
        fail: bool,
    }

    impl ScriptedBackend {
        fn ok(name: &str, hits: Vec<(i64, f32)>) -> Arc<dyn VectorBackend> {
            Arc::new(Self {
                name: name.to_string(),
                hits: hits
                    .into_iter()
                    .map(|(chunk_id, score)| VectorHit {
                        chunk_id,
                        note_id: format!("note-{}", chunk_id),
                        score,
                    })
                    .collect(),
                fail: false,
            })
        }

        fn failing(name: &str) -> Arc<dyn VectorBackend> {
            Arc::new(Self {
                name: name.to_string(),
                hits: Vec::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl VectorBackend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn upsert_batch(&self, _chunks: &[VectorChunk]) -> Result<(), VectorStoreError> {
            if self.fail {
                return Err(VectorStoreError::backend(&self.name, "down"));
            }
            Ok(())
        }

        async fn search(
            &self,
            _query: &[f32],
            _user_id: &str,
            _top_k: usize,
        ) -> Result<Vec<VectorHit>, VectorStoreError> {
            if self.fail {
                return Err(VectorStoreError::backend(&self.name, "down"));
            }
            Ok(self.hits.clone())
        }

        async fn delete_by_note(&self, _note_id: &str) -> Result<usize, VectorStoreError> {
            if self.fail {
                return Err(VectorStoreError::backend(&self.name, "down"));
            }
            Ok(0)
        }

        async fn delete_by_user(&self, _user_id: &str) -> Result<usize, VectorStoreError> {
            if self.fail {
                return Err(VectorStoreError::backend(&self.name, "down"));
            }
            Ok(0)
        }

        async fn indexed_note_timestamps(
            &self,
            _user_id: &str,
        ) -> Result<HashMap<String, DateTime<Utc>>, VectorStoreError> {
            if self.fail {
                return Err(VectorStoreError::backend(&self.name, "down"));
            }
            Ok(HashMap::new())
        }
    }

    fn facade(backends: Vec<Arc<dyn VectorBackend>>) -> VectorStoreFacade {
        VectorStoreFacade::new(backends, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_union_dedup_keeps_higher_score() {
        let facade = facade(vec![
            ScriptedBackend::ok("a", vec![(1, 0.9), (2, 0.5)]),
            ScriptedBackend::ok("b", vec![(2, 0.8), (3, 0.4)]),
        ]);

        let hits = facade.search(&[1.0], "u1", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, 1);
        assert_eq!(hits[1].chunk_id, 2);
        assert!((hits[1].score - 0.8).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_degraded_search_serves_survivor() {
        let facade = facade(vec![
            ScriptedBackend::failing("a"),
            ScriptedBackend::ok("b", vec![(7, 0.6)]),
        ]);

        let hits = facade.search(&[1.0], "u1", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 7);
    }

    #[tokio::test]
    async fn test_both_backends_down_is_hard_failure() {
        let facade = facade(vec![
            ScriptedBackend::failing("a"),
            ScriptedBackend::failing("b"),
        ]);

        let result = facade.search(&[1.0], "u1", 10, 0.0).await;
        assert!(matches!(
            result,
            Err(VectorStoreError::AllBackendsFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_write_reported() {
        let facade = facade(vec![
            ScriptedBackend::ok("a", vec![]),
            ScriptedBackend::failing("b"),
        ]);

        let outcome = facade.delete_by_note("n1").await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_threshold_filters() {
        let facade = facade(vec![ScriptedBackend::ok("a", vec![(1, 0.9), (2, 0.2)])]);

        let hits = facade.search(&[1.0], "u1", 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 1);
    }
}
