//! SQLite database management with migrations
//!
//! Store of record for chunks and the retrieval query log. Per-note chunk
//! replacement happens inside one transaction so readers never observe a
//! mixed old/new chunk set.

use crate::error::{RecollectError, Result};
use crate::retrieval::RagQueryLog;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// A chunk ready to be persisted (id not yet assigned)
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

/// A persisted chunk row
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub note_id: String,
    pub user_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    pub note_snapshot_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecollectError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| RecollectError::Pool(e.to_string()))?;

        {
            let conn = pool.get().map_err(|e| RecollectError::Pool(e.to_string()))?;

            // WAL keeps concurrent readers off the writers' backs
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| RecollectError::Pool(e.to_string()))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Replace a note's entire chunk set atomically, returning the stored
    /// rows with their assigned ids
    pub fn replace_note_chunks(
        &self,
        note_id: &str,
        user_id: &str,
        snapshot_updated_at: DateTime<Utc>,
        chunks: &[NewChunk],
    ) -> Result<Vec<ChunkRecord>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM chunks WHERE note_id = ?1", params![note_id])?;

        let created_at = Utc::now();
        let mut records = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (
                    note_id, user_id, chunk_index, content, embedding,
                    embedding_provider, embedding_model, embedding_dimensions,
                    note_snapshot_updated_at, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    note_id,
                    user_id,
                    chunk.chunk_index as i64,
                    chunk.content,
                    chunk.embedding.as_deref().map(embedding_to_blob),
                    chunk.embedding_provider,
                    chunk.embedding_model,
                    chunk.embedding_dimensions.map(|d| d as i64),
                    snapshot_updated_at.timestamp_millis(),
                    created_at.timestamp_millis(),
                ],
            )?;

            records.push(ChunkRecord {
                id: tx.last_insert_rowid(),
                note_id: note_id.to_string(),
                user_id: user_id.to_string(),
                chunk_index: chunk.chunk_index,
                content: chunk.content.clone(),
                embedding: chunk.embedding.clone(),
                embedding_provider: chunk.embedding_provider.clone(),
                embedding_model: chunk.embedding_model.clone(),
                embedding_dimensions: chunk.embedding_dimensions,
                note_snapshot_updated_at: snapshot_updated_at,
                created_at,
            });
        }

        tx.commit()?;
        Ok(records)
    }

    /// Delete all chunks of a note, returning how many rows went away
    pub fn delete_note_chunks(&self, note_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM chunks WHERE note_id = ?1", params![note_id])?;
        Ok(deleted)
    }

    /// Delete all chunks of a user
    pub fn delete_user_chunks(&self, user_id: &str) -> Result<usize> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM chunks WHERE user_id = ?1", params![user_id])?;
        Ok(deleted)
    }

    /// Fetch chunks by id (hydration after fusion)
    pub fn get_chunks(&self, ids: &[i64]) -> Result<Vec<ChunkRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, note_id, user_id, chunk_index, content, embedding,
                    embedding_provider, embedding_model, embedding_dimensions,
                    note_snapshot_updated_at, created_at
             FROM chunks WHERE id IN ({})",
            placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_chunk)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// All chunks of one note, ordered by chunk index
    pub fn note_chunks(&self, note_id: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, note_id, user_id, chunk_index, content, embedding,
                    embedding_provider, embedding_model, embedding_dimensions,
                    note_snapshot_updated_at, created_at
             FROM chunks WHERE note_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![note_id], row_to_chunk)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Note ids currently indexed for a user
    pub fn indexed_note_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT note_id FROM chunks WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Snapshot timestamps per indexed note for staleness detection
    pub fn indexed_note_timestamps(
        &self,
        user_id: &str,
    ) -> Result<HashMap<String, DateTime<Utc>>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT note_id, MAX(note_snapshot_updated_at)
             FROM chunks WHERE user_id = ?1 GROUP BY note_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (note_id, millis) = row?;
            if let Some(ts) = DateTime::from_timestamp_millis(millis) {
                map.insert(note_id, ts);
            }
        }
        Ok(map)
    }

    /// Chunks with stored embeddings for one user (exact-scan backend input)
    pub fn embedded_chunks(&self, user_id: &str) -> Result<Vec<(i64, String, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, note_id, embedding FROM chunks
             WHERE user_id = ?1 AND embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (id, note_id, blob) = row?;
            chunks.push((id, note_id, blob_to_embedding(&blob)));
        }
        Ok(chunks)
    }

    /// Persist a query log record (write-once)
    pub fn insert_query_log(&self, log: &RagQueryLog) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO query_log (
                id, user_id, query, created_at, stage_timings, channel_stats, toggles
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                log.id,
                log.user_id,
                log.query,
                log.created_at.timestamp_millis(),
                serde_json::to_string(&log.stage_timings).map_err(|e| RecollectError::Json {
                    source: e,
                    context: "stage_timings".to_string(),
                })?,
                serde_json::to_string(&log.channel_stats).map_err(|e| RecollectError::Json {
                    source: e,
                    context: "channel_stats".to_string(),
                })?,
                serde_json::to_string(&log.toggles).map_err(|e| RecollectError::Json {
                    source: e,
                    context: "toggles".to_string(),
                })?,
            ],
        )?;
        Ok(())
    }

    /// Attach feedback to a query log entry; only the first attachment wins
    pub fn attach_query_feedback(
        &self,
        log_id: &str,
        rating: i32,
        comment: Option<&str>,
    ) -> Result<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE query_log
             SET feedback_rating = ?2, feedback_comment = ?3, feedback_at = ?4
             WHERE id = ?1 AND feedback_at IS NULL",
            params![log_id, rating, comment, Utc::now().timestamp_millis()],
        )?;
        Ok(updated == 1)
    }

    /// Read back one query log entry's feedback, if any
    pub fn query_feedback(&self, log_id: &str) -> Result<Option<(i32, Option<String>)>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                "SELECT feedback_rating, feedback_comment FROM query_log
                 WHERE id = ?1 AND feedback_at IS NOT NULL",
                params![log_id],
                |row| Ok((row.get::<_, i32>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let note_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT note_id) FROM chunks",
            [],
            |row| row.get(0),
        )?;

        let user_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT user_id) FROM chunks",
            [],
            |row| row.get(0),
        )?;

        let query_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM query_log", [], |row| row.get(0))?;

        Ok(DbStats {
            chunk_count: chunk_count as usize,
            note_count: note_count as usize,
            user_count: user_count as usize,
            query_count: query_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub chunk_count: usize,
    pub note_count: usize,
    pub user_count: usize,
    pub query_count: usize,
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let snapshot_millis: i64 = row.get(9)?;
    let created_millis: i64 = row.get(10)?;
    Ok(ChunkRecord {
        id: row.get(0)?,
        note_id: row.get(1)?,
        user_id: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)? as usize,
        content: row.get(4)?,
        embedding: row
            .get::<_, Option<Vec<u8>>>(5)?
            .map(|blob| blob_to_embedding(&blob)),
        embedding_provider: row.get(6)?,
        embedding_model: row.get(7)?,
        embedding_dimensions: row.get::<_, Option<i64>>(8)?.map(|d| d as usize),
        note_snapshot_updated_at: DateTime::from_timestamp_millis(snapshot_millis)
            .unwrap_or_else(Utc::now),
        created_at: DateTime::from_timestamp_millis(created_millis).unwrap_or_else(Utc::now),
    })
}

fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Chunks table: the persisted retrieval unit
    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        note_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding BLOB,
        embedding_provider TEXT,
        embedding_model TEXT,
        embedding_dimensions INTEGER,
        note_snapshot_updated_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (note_id, chunk_index)
    );

    CREATE INDEX idx_chunks_note ON chunks(note_id);
    CREATE INDEX idx_chunks_user ON chunks(user_id);

    -- Query log: write-once record of each retrieval execution
    CREATE TABLE query_log (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        query TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        stage_timings TEXT NOT NULL,
        channel_stats TEXT NOT NULL,
        toggles TEXT NOT NULL,
        feedback_rating INTEGER,
        feedback_comment TEXT,
        feedback_at INTEGER
    );

    CREATE INDEX idx_query_log_user ON query_log(user_id);
    CREATE INDEX idx_query_log_created ON query_log(created_at);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("test.db")).unwrap();
        (db, temp)
    }

    fn draft(index: usize, content: &str) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: content.to_string(),
            embedding: Some(vec![0.1 * index as f32, 0.5, 0.9]),
            embedding_provider: Some("test".to_string()),
            embedding_model: Some("test-model".to_string()),
            embedding_dimensions: Some(3),
        }
    }

    #[test]
    fn test_migrations_apply() {
        let (db, _temp) = test_db();
        let conn = db.get_conn().unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_replace_and_fetch_chunks() {
        let (db, _temp) = test_db();
        let now = Utc::now();

        let records = db
            .replace_note_chunks("note-1", "user-1", now, &[draft(0, "first"), draft(1, "second")])
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chunk_index, 0);

        let fetched = db.get_chunks(&[records[0].id, records[1].id]).unwrap();
        assert_eq!(fetched.len(), 2);

        let first = fetched.iter().find(|c| c.id == records[0].id).unwrap();
        assert_eq!(first.content, "first");
        assert_eq!(first.embedding.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_replace_is_atomic_set_swap() {
        let (db, _temp) = test_db();
        let now = Utc::now();

        db.replace_note_chunks(
            "note-1",
            "user-1",
            now,
            &[draft(0, "old-a"), draft(1, "old-b"), draft(2, "old-c")],
        )
        .unwrap();

        db.replace_note_chunks("note-1", "user-1", now, &[draft(0, "new-a")])
            .unwrap();

        let chunks = db.note_chunks("note-1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "new-a");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_indexed_note_timestamps() {
        let (db, _temp) = test_db();
        let t1 = Utc::now();

        db.replace_note_chunks("note-1", "user-1", t1, &[draft(0, "a")])
            .unwrap();
        db.replace_note_chunks("note-2", "user-1", t1, &[draft(0, "b")])
            .unwrap();
        db.replace_note_chunks("note-3", "user-2", t1, &[draft(0, "c")])
            .unwrap();

        let map = db.indexed_note_timestamps("user-1").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get("note-1").unwrap().timestamp_millis(),
            t1.timestamp_millis()
        );
    }

    #[test]
    fn test_delete_by_note_and_user() {
        let (db, _temp) = test_db();
        let now = Utc::now();

        db.replace_note_chunks("note-1", "user-1", now, &[draft(0, "a")])
            .unwrap();
        db.replace_note_chunks("note-2", "user-1", now, &[draft(0, "b")])
            .unwrap();

        assert_eq!(db.delete_note_chunks("note-1").unwrap(), 1);
        assert_eq!(db.indexed_note_ids("user-1").unwrap(), vec!["note-2"]);

        assert_eq!(db.delete_user_chunks("user-1").unwrap(), 1);
        assert!(db.indexed_note_ids("user-1").unwrap().is_empty());
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let vector = vec![0.25_f32, -1.5, 3.75, 0.0];
        let blob = embedding_to_blob(&vector);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), vector);
    }

    #[test]
    fn test_feedback_attaches_once() {
        let (db, _temp) = test_db();
        let log = RagQueryLog::new("user-1", "how do i rotate keys");
        db.insert_query_log(&log).unwrap();

        assert!(db.attach_query_feedback(&log.id, 4, Some("good")).unwrap());
        // Second attachment is refused
        assert!(!db.attach_query_feedback(&log.id, 1, None).unwrap());

        let (rating, comment) = db.query_feedback(&log.id).unwrap().unwrap();
        assert_eq!(rating, 4);
        assert_eq!(comment.as_deref(), Some("good"));
    }
}
