//! Note model and the source-of-truth seam
//!
//! Notes are owned by an external collaborator; this crate only observes
//! them through [`NoteSource`] when an indexing pass runs.

mod fs;

pub use fs::FsNoteSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live note as seen by the indexing orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Staleness key: compared against the snapshot recorded on chunks
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            updated_at,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Source of live notes for a user
#[async_trait]
pub trait NoteSource: Send + Sync {
    async fn list_notes(&self, user_id: &str) -> anyhow::Result<Vec<Note>>;
}
