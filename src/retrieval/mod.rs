//! Hybrid retrieval pipeline
//!
//! Expansion, concurrent vector + lexical search, weighted reciprocal rank
//! fusion, optional LLM reranking, and the query log that records each run.

mod engine;
mod expansion;
mod fusion;
mod query_log;
mod reranker;

pub use engine::{RetrievalEngine, RetrievalResponse, RetrievedChunk};
pub use expansion::QueryExpander;
pub use fusion::{fuse, ChannelKind, FusedHit, RankedList};
pub use query_log::{ChannelStats, QueryToggles, RagQueryLog, StageTimings};
pub use reranker::{RerankCandidate, RerankedHit, Reranker};

use crate::config::RetrievalConfig;
use serde::{Deserialize, Serialize};

/// Which search channels surfaced a chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFlags {
    pub vector: bool,
    pub lexical: bool,
}

/// Per-call overrides; None keeps the configured behavior
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    pub top_k: Option<usize>,
    pub hybrid: Option<bool>,
    pub hyde: Option<bool>,
    pub multi_query: Option<bool>,
    pub rerank: Option<bool>,
}

impl RetrievalOptions {
    pub(crate) fn apply(&self, base: &RetrievalConfig) -> RetrievalConfig {
        let mut config = base.clone();
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(hybrid) = self.hybrid {
            config.enable_hybrid = hybrid;
        }
        if let Some(hyde) = self.hyde {
            config.enable_hyde = hyde;
        }
        if let Some(multi_query) = self.multi_query {
            config.enable_multi_query = multi_query;
        }
        if let Some(rerank) = self.rerank {
            config.enable_reranking = rerank;
        }
        config
    }
}
