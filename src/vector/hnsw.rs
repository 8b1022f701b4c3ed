//! HNSW ANN vector backend
//!
//! In-process approximate nearest neighbor index over hnsw_rs. The library
//! has no native delete, so removals are tombstoned and filtered at search
//! time; a metadata side-map carries the note/user scoping the graph itself
//! cannot express.

use crate::vector::backend::{VectorBackend, VectorChunk, VectorHit, VectorStoreError};
use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use std::collections::HashMap;
use std::sync::RwLock;

const BACKEND_NAME: &str = "hnsw";

/// Graph construction cap on connections
const MAX_NB_CONNECTION: usize = 200;

/// Over-fetch factor compensating for tombstone and user filtering
const OVERFETCH: usize = 4;

struct ChunkMeta {
    note_id: String,
    user_id: String,
    snapshot_updated_at: DateTime<Utc>,
}

struct HnswState {
    index: Hnsw<'static, f32, DistCosine>,
    meta: AHashMap<i64, ChunkMeta>,
    tombstones: AHashSet<i64>,
}

pub struct HnswBackend {
    state: RwLock<HnswState>,
    dimension: usize,
    ef_search: usize,
    m: usize,
    ef_construction: usize,
}

impl HnswBackend {
    pub fn new(dimension: usize, ef_construction: usize, m: usize, ef_search: usize) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            m,
            dimension,
            ef_construction,
            MAX_NB_CONNECTION,
            DistCosine,
        );

        Self {
            state: RwLock::new(HnswState {
                index,
                meta: AHashMap::new(),
                tombstones: AHashSet::new(),
            }),
            dimension,
            ef_search,
            m,
            ef_construction,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Live (non-tombstoned) vector count
    pub fn len(&self) -> usize {
        let state = self.state.read().expect("hnsw lock poisoned");
        state.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorBackend for HnswBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn upsert_batch(&self, chunks: &[VectorChunk]) -> Result<(), VectorStoreError> {
        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
        }

        let mut state = self.state.write().expect("hnsw lock poisoned");
        for chunk in chunks {
            state.index.insert((&chunk.embedding, chunk.chunk_id as usize));
            state.tombstones.remove(&chunk.chunk_id);
            state.meta.insert(
                chunk.chunk_id,
                ChunkMeta {
                    note_id: chunk.note_id.clone(),
                    user_id: chunk.user_id.clone(),
                    snapshot_updated_at: chunk.snapshot_updated_at,
                },
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        if query.len() != self.dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let state = self.state.read().expect("hnsw lock poisoned");
        if state.meta.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = (top_k * OVERFETCH).max(self.ef_search);
        let neighbours = state.index.search(query, fetch, self.ef_search);

        let mut hits = Vec::new();
        for neighbour in neighbours {
            let chunk_id = neighbour.d_id as i64;
            if state.tombstones.contains(&chunk_id) {
                continue;
            }
            let Some(meta) = state.meta.get(&chunk_id) else {
                continue;
            };
            if meta.user_id != user_id {
                continue;
            }
            hits.push(VectorHit {
                chunk_id,
                note_id: meta.note_id.clone(),
                score: 1.0 - neighbour.distance,
            });
            if hits.len() == top_k {
                break;
            }
        }

        Ok(hits)
    }

    async fn delete_by_note(&self, note_id: &str) -> Result<usize, VectorStoreError> {
        let mut state = self.state.write().expect("hnsw lock poisoned");
        let doomed: Vec<i64> = state
            .meta
            .iter()
            .filter(|(_, meta)| meta.note_id == note_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            state.meta.remove(id);
            state.tombstones.insert(*id);
        }
        Ok(doomed.len())
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize, VectorStoreError> {
        let mut state = self.state.write().expect("hnsw lock poisoned");
        let doomed: Vec<i64> = state
            .meta
            .iter()
            .filter(|(_, meta)| meta.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();

        for id in &doomed {
            state.meta.remove(id);
            state.tombstones.insert(*id);
        }

        // The graph itself only shrinks on a full rebuild; an empty index
        // can shed its tombstones immediately
        if state.meta.is_empty() {
            state.tombstones.clear();
            state.index = Hnsw::<f32, DistCosine>::new(
                self.m,
                self.dimension,
                self.ef_construction,
                MAX_NB_CONNECTION,
                DistCosine,
            );
        }

        Ok(doomed.len())
    }

    async fn indexed_note_timestamps(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, VectorStoreError> {
        let state = self.state.read().expect("hnsw lock poisoned");
        let mut map: HashMap<String, DateTime<Utc>> = HashMap::new();
        for meta in state.meta.values() {
            if meta.user_id == user_id {
                map.entry(meta.note_id.clone())
                    .and_modify(|ts| {
                        if meta.snapshot_updated_at > *ts {
                            *ts = meta.snapshot_updated_at;
                        }
                    })
                    .or_insert(meta.snapshot_updated_at);
            }
        }
        Ok(map)
    }
}
