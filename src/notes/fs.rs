//! Filesystem note source
//!
//! Treats a directory of markdown/text files as one user's notes: the
//! relative path is the note id, the file stem is the title and the file
//! mtime is the staleness key. Good enough for the CLI and for trying the
//! engine against a real notes folder; server deployments plug in their
//! own [`NoteSource`].

use crate::notes::{Note, NoteSource};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

pub struct FsNoteSource {
    root: PathBuf,
}

impl FsNoteSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn collect(&self, dir: &Path, notes: &mut Vec<Note>) -> anyhow::Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading notes directory {:?}", dir))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                self.collect(&path, notes)?;
                continue;
            }

            let is_note = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("md") | Some("markdown") | Some("txt")
            );
            if !is_note {
                continue;
            }

            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading note {:?}", path))?;
            let modified = entry.metadata()?.modified()?;
            let updated_at: DateTime<Utc> = modified.into();

            let id = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone());

            notes.push(Note::new(id, title, content, updated_at));
        }

        Ok(())
    }
}

#[async_trait]
impl NoteSource for FsNoteSource {
    // The directory itself scopes the user; user_id only labels the chunks
    async fn list_notes(&self, _user_id: &str) -> anyhow::Result<Vec<Note>> {
        let mut notes = Vec::new();
        self.collect(&self.root.clone(), &mut notes)?;
        Ok(notes)
    }
}
