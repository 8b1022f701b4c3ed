//! Incremental indexing: job tracking and the orchestrator that keeps the
//! chunk index consistent with the note source

mod job;
mod orchestrator;

pub use job::{IndexingJob, JobStatus, JobTracker};
pub use orchestrator::IndexingOrchestrator;
