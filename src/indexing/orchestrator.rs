//! Indexing orchestrator
//!
//! Keeps chunk state consistent with the note source at minimal recompute:
//! only notes whose updated_at drifted from the indexed snapshot are
//! re-chunked and re-embedded, orphaned notes are deleted, and everything
//! else is skipped. Each note's chunk set is replaced atomically; per-note
//! failures are recorded on the job and the run continues.

use crate::chunking::{chunk_note, ChunkDraft};
use crate::config::ChunkingConfig;
use crate::embedding::{EmbeddingCache, EmbeddingProvider};
use crate::error::Result;
use crate::indexing::{JobStatus, JobTracker};
use crate::lexical::{LexicalBackend, LexicalChunk};
use crate::notes::{Note, NoteSource};
use crate::storage::{Database, NewChunk};
use crate::vector::{VectorChunk, VectorStoreFacade, WriteOutcome};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct IndexingOrchestrator {
    note_source: Arc<dyn NoteSource>,
    database: Arc<Database>,
    vector_store: Arc<VectorStoreFacade>,
    lexical: Arc<dyn LexicalBackend>,
    cache: Arc<EmbeddingCache>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    tracker: Arc<JobTracker>,
    chunking: ChunkingConfig,
    max_concurrent_notes: usize,
}

impl IndexingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        note_source: Arc<dyn NoteSource>,
        database: Arc<Database>,
        vector_store: Arc<VectorStoreFacade>,
        lexical: Arc<dyn LexicalBackend>,
        cache: Arc<EmbeddingCache>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        tracker: Arc<JobTracker>,
        chunking: ChunkingConfig,
        max_concurrent_notes: usize,
    ) -> Self {
        Self {
            note_source,
            database,
            vector_store,
            lexical,
            cache,
            embedding_provider,
            tracker,
            chunking,
            max_concurrent_notes: max_concurrent_notes.max(1),
        }
    }

    pub fn tracker(&self) -> Arc<JobTracker> {
        Arc::clone(&self.tracker)
    }

    /// Start an indexing run in the background and return its job id.
    /// Rejected when a run for the same user is already live.
    pub fn start(self: &Arc<Self>, user_id: &str) -> Result<String> {
        let job_id = self.tracker.create(
            user_id,
            self.embedding_provider.provider_name(),
            self.embedding_provider.model_name(),
        )?;

        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        let spawned_job = job_id.clone();
        tokio::spawn(async move {
            this.execute(&spawned_job, &user_id).await;
        });

        Ok(job_id)
    }

    /// Run one indexing pass to completion (CLI and tests)
    pub async fn run_to_completion(self: &Arc<Self>, user_id: &str) -> Result<String> {
        let job_id = self.tracker.create(
            user_id,
            self.embedding_provider.provider_name(),
            self.embedding_provider.model_name(),
        )?;
        self.execute(&job_id, user_id).await;
        Ok(job_id)
    }

    async fn execute(self: &Arc<Self>, job_id: &str, user_id: &str) {
        self.tracker.update(job_id, |job| {
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
        });

        // Both of these are required to even compute the work set; failing
        // here fails the whole job
        let notes = match self.note_source.list_notes(user_id).await {
            Ok(notes) => notes,
            Err(e) => {
                warn!("Indexing failed to list notes for {}: {}", user_id, e);
                self.tracker
                    .update(job_id, |job| job.errors.push(format!("list notes: {}", e)));
                self.tracker.finish(job_id, JobStatus::Failed);
                return;
            }
        };

        let indexed = match self.vector_store.indexed_note_timestamps(user_id).await {
            Ok(map) => map,
            Err(e) => {
                warn!("Indexing failed to read index state for {}: {}", user_id, e);
                self.tracker.update(job_id, |job| {
                    job.errors.push(format!("read index state: {}", e))
                });
                self.tracker.finish(job_id, JobStatus::Failed);
                return;
            }
        };

        // Stale or new: snapshot drifted or never indexed. Unchanged notes
        // are skipped entirely; that is the incremental-cost guarantee.
        let stale: Vec<&Note> = notes
            .iter()
            .filter(|note| {
                indexed
                    .get(&note.id)
                    .map(|snapshot| {
                        snapshot.timestamp_millis() != note.updated_at.timestamp_millis()
                    })
                    .unwrap_or(true)
            })
            .collect();

        let live_ids: ahash::AHashSet<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        let orphaned: Vec<String> = indexed
            .keys()
            .filter(|id| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();

        info!(
            "Indexing {}: {} live notes, {} stale/new, {} orphaned",
            user_id,
            notes.len(),
            stale.len(),
            orphaned.len()
        );

        self.tracker
            .update(job_id, |job| job.total_notes = stale.len());

        // Process stale notes concurrently up to the configured limit
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_notes));
        let tasks = stale.iter().map(|note| {
            let this = Arc::clone(self);
            let note = (*note).clone();
            let job_id = job_id.to_string();
            let semaphore = Arc::clone(&semaphore);
            let user_id = user_id.to_string();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                match this.process_note(&job_id, &user_id, &note).await {
                    Ok(chunk_count) => {
                        this.tracker.update(&job_id, |job| {
                            job.processed_notes += 1;
                            job.processed_chunks += chunk_count;
                        });
                    }
                    Err(e) => {
                        warn!("Indexing note {} failed: {}", note.id, e);
                        this.tracker.update(&job_id, |job| {
                            job.errors.push(format!("note {}: {}", note.id, e));
                        });
                    }
                }
            }
        });
        join_all(tasks).await;

        for note_id in &orphaned {
            if let Err(e) = self.remove_note(job_id, note_id).await {
                warn!("Orphan cleanup for note {} failed: {}", note_id, e);
                self.tracker.update(job_id, |job| {
                    job.errors.push(format!("orphan {}: {}", note_id, e));
                });
            }
        }

        if let Err(e) = self.lexical.commit().await {
            self.tracker
                .update(job_id, |job| job.errors.push(format!("lexical commit: {}", e)));
        }

        self.tracker.finish(job_id, JobStatus::Completed);
        debug!("Indexing job {} finished", job_id);
    }

    /// Re-chunk, re-embed and atomically replace one note's chunk set
    async fn process_note(
        &self,
        job_id: &str,
        user_id: &str,
        note: &Note,
    ) -> anyhow::Result<usize> {
        let drafts = chunk_note(&note.content, Some(&note.title), &note.tags, &self.chunking);

        // Planned work is counted up front; processed_chunks catches up
        // only when the writes land, so a failed note leaves a visible gap
        self.tracker
            .update(job_id, |job| job.total_chunks += drafts.len());

        // A note that chunks to nothing still replaces (clears) its set
        if drafts.is_empty() {
            self.remove_note(job_id, &note.id).await?;
            return Ok(0);
        }

        // Embedding failure degrades to lexical-only chunks instead of
        // failing the note
        let embeddings = match self.embed_drafts(&drafts).await {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                warn!(
                    "Embedding unavailable for note {}; indexing without vectors: {}",
                    note.id, e
                );
                None
            }
        };

        let provider = self.embedding_provider.provider_name().to_string();
        let model = self.embedding_provider.model_name().to_string();
        let dimensions = self.embedding_provider.dimensions();

        let new_chunks: Vec<NewChunk> = drafts
            .iter()
            .enumerate()
            .map(|(i, draft)| {
                let embedding = embeddings.as_ref().map(|vectors| vectors[i].as_ref().clone());
                NewChunk {
                    chunk_index: draft.chunk_index,
                    content: draft.content.clone(),
                    embedding,
                    embedding_provider: embeddings.as_ref().map(|_| provider.clone()),
                    embedding_model: embeddings.as_ref().map(|_| model.clone()),
                    embedding_dimensions: embeddings.as_ref().map(|_| dimensions),
                }
            })
            .collect();

        // Store of record first; one transaction, so readers see the old
        // set or the new set
        let records =
            self.database
                .replace_note_chunks(&note.id, user_id, note.updated_at, &new_chunks)?;

        // Secondary indexes follow the same delete-then-upsert order
        self.lexical.delete_by_note(&note.id).await?;
        let lexical_chunks: Vec<LexicalChunk> = records
            .iter()
            .map(|record| LexicalChunk {
                chunk_id: record.id,
                note_id: record.note_id.clone(),
                user_id: record.user_id.clone(),
                content: record.content.clone(),
            })
            .collect();
        self.lexical.index_chunks(&lexical_chunks).await?;

        let outcome = self.vector_store.delete_by_note(&note.id).await?;
        self.record_partial_write(job_id, &note.id, "vector delete", &outcome);
        let vector_chunks: Vec<VectorChunk> = records
            .iter()
            .filter_map(|record| {
                record.embedding.as_ref().map(|embedding| VectorChunk {
                    chunk_id: record.id,
                    note_id: record.note_id.clone(),
                    user_id: record.user_id.clone(),
                    embedding: embedding.clone(),
                    snapshot_updated_at: record.note_snapshot_updated_at,
                })
            })
            .collect();
        if !vector_chunks.is_empty() {
            let outcome = self.vector_store.upsert_batch(&vector_chunks).await?;
            self.record_partial_write(job_id, &note.id, "vector upsert", &outcome);
        }

        Ok(records.len())
    }

    /// A write that landed on only some vector backends completes the note
    /// but goes on the job record
    fn record_partial_write(
        &self,
        job_id: &str,
        note_id: &str,
        operation: &str,
        outcome: &WriteOutcome,
    ) {
        if outcome.complete {
            return;
        }
        for failure in &outcome.failures {
            self.tracker.update(job_id, |job| {
                job.errors
                    .push(format!("note {}: partial {}: {}", note_id, operation, failure));
            });
        }
    }

    async fn embed_drafts(
        &self,
        drafts: &[ChunkDraft],
    ) -> anyhow::Result<Vec<Arc<Vec<f32>>>> {
        let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
        let vectors = self
            .cache
            .embed_batch(&self.embedding_provider, &texts)
            .await?;
        Ok(vectors)
    }

    /// Delete every trace of a note from store and indexes
    async fn remove_note(&self, job_id: &str, note_id: &str) -> anyhow::Result<()> {
        self.database.delete_note_chunks(note_id)?;
        let outcome = self.vector_store.delete_by_note(note_id).await?;
        self.record_partial_write(job_id, note_id, "vector delete", &outcome);
        self.lexical.delete_by_note(note_id).await?;
        Ok(())
    }
}
