//! Indexing job records and the in-process tracker
//!
//! Jobs are mutated only by the orchestrator and are retained after they
//! finish for observability. A terminal job is never mutated again.

use crate::error::{RecollectError, Result};
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One indexing run for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: String,
    pub user_id: String,
    pub status: JobStatus,
    pub total_notes: usize,
    pub processed_notes: usize,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    /// Per-note failures; non-fatal, the run continues past them
    pub errors: Vec<String>,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IndexingJob {
    fn new(user_id: &str, embedding_provider: &str, embedding_model: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: JobStatus::Pending,
            total_notes: 0,
            processed_notes: 0,
            total_chunks: 0,
            processed_chunks: 0,
            errors: Vec::new(),
            embedding_provider: embedding_provider.to_string(),
            embedding_model: embedding_model.to_string(),
            started_at: None,
            completed_at: None,
        }
    }
}

struct TrackerState {
    jobs: AHashMap<String, IndexingJob>,
    /// Users with a non-terminal job; one indexing pass per user at a time
    active_users: AHashSet<String>,
}

/// Tracks indexing jobs and enforces per-user exclusion
pub struct JobTracker {
    state: Mutex<TrackerState>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                jobs: AHashMap::new(),
                active_users: AHashSet::new(),
            }),
        }
    }

    /// Create a Pending job, rejecting overlap for the same user
    pub fn create(
        &self,
        user_id: &str,
        embedding_provider: &str,
        embedding_model: &str,
    ) -> Result<String> {
        let mut state = self.state.lock().expect("tracker lock poisoned");

        if state.active_users.contains(user_id) {
            return Err(RecollectError::IndexingAlreadyRunning {
                user_id: user_id.to_string(),
            });
        }

        let job = IndexingJob::new(user_id, embedding_provider, embedding_model);
        let id = job.id.clone();
        state.active_users.insert(user_id.to_string());
        state.jobs.insert(id.clone(), job);
        Ok(id)
    }

    /// Apply a mutation to a live job; terminal jobs are left untouched
    pub fn update<F>(&self, job_id: &str, mutate: F)
    where
        F: FnOnce(&mut IndexingJob),
    {
        let mut state = self.state.lock().expect("tracker lock poisoned");
        if let Some(job) = state.jobs.get_mut(job_id) {
            if !job.status.is_terminal() {
                mutate(job);
            }
        }
    }

    /// Move a job into a terminal state and release its user slot
    pub fn finish(&self, job_id: &str, status: JobStatus) {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock().expect("tracker lock poisoned");

        let user_id = match state.jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                job.completed_at = Some(Utc::now());
                job.user_id.clone()
            }
            _ => return,
        };

        state.active_users.remove(&user_id);
    }

    pub fn get(&self, job_id: &str) -> Result<IndexingJob> {
        let state = self.state.lock().expect("tracker lock poisoned");
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| RecollectError::JobNotFound {
                id: job_id.to_string(),
            })
    }
}
