//! Query log records
//!
//! Every retrieval execution writes one record capturing what ran, how
//! long each stage took and which features were active. Feedback can be
//! attached later through the database, never through this struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wall-clock milliseconds spent in each pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub expansion_ms: u64,
    pub embedding_ms: u64,
    pub search_ms: u64,
    pub fusion_ms: u64,
    pub rerank_ms: u64,
    pub total_ms: u64,
}

/// Candidate counts and raw score shape per channel, before and after fusion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelStats {
    pub query_variants: usize,
    pub vector_hits: usize,
    pub lexical_hits: usize,
    pub vector_top_score: f32,
    pub vector_avg_score: f32,
    pub lexical_top_score: f32,
    pub lexical_avg_score: f32,
    pub fused_candidates: usize,
    pub returned: usize,
    /// True when at least one vector backend degraded during the search
    pub vector_degraded: bool,
}

/// Which optional pipeline features actually ran for this query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryToggles {
    pub hybrid: bool,
    pub hyde: bool,
    pub multi_query: bool,
    pub reranking: bool,
    /// False when the reranker failed and the fused order was served
    pub rerank_applied: bool,
}

/// One retrieval execution, persisted write-once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQueryLog {
    pub id: String,
    pub user_id: String,
    pub query: String,
    pub created_at: DateTime<Utc>,
    pub stage_timings: StageTimings,
    pub channel_stats: ChannelStats,
    pub toggles: QueryToggles,
}

impl RagQueryLog {
    pub fn new(user_id: &str, query: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            query: query.to_string(),
            created_at: Utc::now(),
            stage_timings: StageTimings::default(),
            channel_stats: ChannelStats::default(),
            toggles: QueryToggles::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_serializes_roundtrip() {
        let mut log = RagQueryLog::new("u1", "where are the dns records");
        log.stage_timings.search_ms = 12;
        log.channel_stats.vector_hits = 30;
        log.toggles.hybrid = true;

        let json = serde_json::to_string(&log).unwrap();
        let back: RagQueryLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, log.id);
        assert_eq!(back.stage_timings.search_ms, 12);
        assert_eq!(back.channel_stats.vector_hits, 30);
        assert!(back.toggles.hybrid);
    }
}
