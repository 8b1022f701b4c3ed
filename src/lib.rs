//! Recollect - hybrid retrieval engine for personal notes
//!
//! Chunks and embeds notes incrementally, indexes them into vector and
//! lexical backends, and answers queries with weighted reciprocal rank
//! fusion over both channels, with optional LLM query expansion and
//! reranking.

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod lexical;
pub mod llm;
pub mod notes;
pub mod retrieval;
pub mod storage;
pub mod vector;

pub use error::{RecollectError, Result};
