//! Persistent storage: chunk store of record and query log

mod database;

pub use database::{ChunkRecord, Database, DbStats, NewChunk};
