//! Weighted reciprocal rank fusion
//!
//! Each search channel contributes weight / (k + rank) per hit, with ranks
//! starting at 1. Raw channel scores never mix across channels; they only
//! break ties between equal fused scores.

use crate::retrieval::SourceFlags;
use ahash::AHashMap;

/// Which search channel produced a ranked list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Vector,
    Lexical,
}

/// One channel's ranked hits, best first
#[derive(Debug, Clone)]
pub struct RankedList {
    pub kind: ChannelKind,
    pub weight: f32,
    /// (chunk_id, raw channel score), already ordered by the channel
    pub hits: Vec<(i64, f32)>,
}

/// A chunk after fusion, carrying its combined score and provenance
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub chunk_id: i64,
    pub score: f32,
    /// Best raw score seen in any contributing channel, used for tie-breaks
    pub best_raw_score: f32,
    pub sources: SourceFlags,
}

/// Fuse ranked lists into one ordering. Ties on fused score fall back to
/// the higher best raw score, then the smaller chunk id, so the ordering
/// is fully deterministic.
pub fn fuse(lists: &[RankedList], k: f32) -> Vec<FusedHit> {
    let mut merged: AHashMap<i64, FusedHit> = AHashMap::new();

    for list in lists {
        for (position, (chunk_id, raw_score)) in list.hits.iter().enumerate() {
            let rank = position as f32 + 1.0;
            let contribution = list.weight / (k + rank);

            let entry = merged.entry(*chunk_id).or_insert_with(|| FusedHit {
                chunk_id: *chunk_id,
                score: 0.0,
                best_raw_score: f32::NEG_INFINITY,
                sources: SourceFlags::default(),
            });
            entry.score += contribution;
            entry.best_raw_score = entry.best_raw_score.max(*raw_score);
            match list.kind {
                ChannelKind::Vector => entry.sources.vector = true,
                ChannelKind::Lexical => entry.sources.lexical = true,
            }
        }
    }

    let mut fused: Vec<FusedHit> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.best_raw_score
                    .partial_cmp(&a.best_raw_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}
