//! Store-resident exact-scan vector backend
//!
//! Keeps its rows in the same SQLite file as the chunk store, in a table it
//! owns. Search is a brute-force cosine scan over one user's vectors; exact
//! but linear, which is fine at personal-notes scale and makes this backend
//! the correctness reference for the ANN one.

use crate::storage::Database;
use crate::vector::backend::{
    cosine_similarity, VectorBackend, VectorChunk, VectorHit, VectorStoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::HashMap;
use std::sync::Arc;

const BACKEND_NAME: &str = "sqlite-exact";

pub struct ExactVectorBackend {
    db: Arc<Database>,
}

impl ExactVectorBackend {
    pub fn new(db: Arc<Database>) -> Result<Self, VectorStoreError> {
        let conn = db
            .get_conn()
            .map_err(|e| VectorStoreError::backend(BACKEND_NAME, e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vector_rows (
                chunk_id INTEGER PRIMARY KEY,
                note_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                snapshot_updated_at INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_vector_rows_note ON vector_rows(note_id);
            CREATE INDEX IF NOT EXISTS idx_vector_rows_user ON vector_rows(user_id);
            ",
        )
        .map_err(|e| VectorStoreError::backend(BACKEND_NAME, e.to_string()))?;

        Ok(Self { db })
    }

    fn map_err<E: std::fmt::Display>(e: E) -> VectorStoreError {
        VectorStoreError::backend(BACKEND_NAME, e.to_string())
    }
}

#[async_trait]
impl VectorBackend for ExactVectorBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn upsert_batch(&self, chunks: &[VectorChunk]) -> Result<(), VectorStoreError> {
        let mut conn = self.db.get_conn().map_err(Self::map_err)?;
        let tx = conn.transaction().map_err(Self::map_err)?;

        for chunk in chunks {
            let mut blob = Vec::with_capacity(chunk.embedding.len() * 4);
            for value in &chunk.embedding {
                blob.extend_from_slice(&value.to_le_bytes());
            }

            tx.execute(
                "INSERT INTO vector_rows (chunk_id, note_id, user_id, snapshot_updated_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chunk_id) DO UPDATE SET
                    note_id = excluded.note_id,
                    user_id = excluded.user_id,
                    snapshot_updated_at = excluded.snapshot_updated_at,
                    embedding = excluded.embedding",
                params![
                    chunk.chunk_id,
                    chunk.note_id,
                    chunk.user_id,
                    chunk.snapshot_updated_at.timestamp_millis(),
                    blob,
                ],
            )
            .map_err(Self::map_err)?;
        }

        tx.commit().map_err(Self::map_err)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<VectorHit>, VectorStoreError> {
        let conn = self.db.get_conn().map_err(Self::map_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT chunk_id, note_id, embedding FROM vector_rows WHERE user_id = ?1",
            )
            .map_err(Self::map_err)?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })
            .map_err(Self::map_err)?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, note_id, blob) = row.map_err(Self::map_err)?;
            let embedding: Vec<f32> = blob
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            if embedding.len() != query.len() {
                return Err(VectorStoreError::InvalidDimension {
                    expected: embedding.len(),
                    actual: query.len(),
                });
            }

            hits.push(VectorHit {
                chunk_id,
                note_id,
                score: cosine_similarity(query, &embedding),
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_by_note(&self, note_id: &str) -> Result<usize, VectorStoreError> {
        let conn = self.db.get_conn().map_err(Self::map_err)?;
        conn.execute("DELETE FROM vector_rows WHERE note_id = ?1", params![note_id])
            .map_err(Self::map_err)
    }

    async fn delete_by_user(&self, user_id: &str) -> Result<usize, VectorStoreError> {
        let conn = self.db.get_conn().map_err(Self::map_err)?;
        conn.execute("DELETE FROM vector_rows WHERE user_id = ?1", params![user_id])
            .map_err(Self::map_err)
    }

    async fn indexed_note_timestamps(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>, VectorStoreError> {
        let conn = self.db.get_conn().map_err(Self::map_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT note_id, MAX(snapshot_updated_at) FROM vector_rows
                 WHERE user_id = ?1 GROUP BY note_id",
            )
            .map_err(Self::map_err)?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(Self::map_err)?;

        let mut map = HashMap::new();
        for row in rows {
            let (note_id, millis) = row.map_err(Self::map_err)?;
            if let Some(ts) = DateTime::from_timestamp_millis(millis) {
                map.insert(note_id, ts);
            }
        }
        Ok(map)
    }
}
