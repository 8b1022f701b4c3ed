//! LLM reranking
//!
//! Scores fused candidates against the query with one completion call and
//! reorders by the scores. Any failure along the way (provider down,
//! unparseable output) yields None and the caller serves the fused order;
//! reranking can only ever refine results, not lose them to an outage.

use crate::config::RerankScale;
use crate::llm::{CompletionProvider, CompletionRequest};
use ahash::AHashMap;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// A fused candidate handed to the reranker, in fused order
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub chunk_id: i64,
    pub content: String,
}

/// A candidate the reranker kept, score normalized to the unit interval
#[derive(Debug, Clone)]
pub struct RerankedHit {
    pub chunk_id: i64,
    pub score: f32,
}

pub struct Reranker {
    provider: Arc<dyn CompletionProvider>,
    scale: RerankScale,
    min_score: f32,
    max_tokens: u32,
}

impl Reranker {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        scale: RerankScale,
        min_score: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            scale,
            min_score,
            max_tokens,
        }
    }

    /// Rerank candidates by LLM relevance judgment. Candidates scoring
    /// below the floor are dropped; candidates the model did not score
    /// are treated as 0. None means the caller should keep the fused
    /// order.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
    ) -> Option<Vec<RerankedHit>> {
        if candidates.is_empty() {
            return Some(Vec::new());
        }

        let request = CompletionRequest {
            prompt: self.build_prompt(query, candidates),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = match self.provider.complete(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Reranker unavailable, keeping fused order: {}", e);
                return None;
            }
        };

        let scores = parse_scores(&response, candidates.len());
        if scores.is_empty() {
            warn!("Reranker output unparseable, keeping fused order");
            return None;
        }
        debug!("Reranker scored {}/{} candidates", scores.len(), candidates.len());

        let mut hits: Vec<(usize, RerankedHit)> = candidates
            .iter()
            .enumerate()
            .map(|(position, candidate)| {
                let score = scores
                    .get(&(position + 1))
                    .map(|raw| self.normalize(*raw))
                    .unwrap_or(0.0);
                (
                    position,
                    RerankedHit {
                        chunk_id: candidate.chunk_id,
                        score,
                    },
                )
            })
            .filter(|(_, hit)| hit.score >= self.min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        Some(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    fn build_prompt(&self, query: &str, candidates: &[RerankCandidate]) -> String {
        let scale_line = match self.scale {
            RerankScale::ZeroToTen => "an integer from 0 (irrelevant) to 10 (directly answers it)",
            RerankScale::UnitInterval => "a number from 0.0 (irrelevant) to 1.0 (directly answers it)",
        };

        let mut prompt = format!(
            "Rate how relevant each passage is to the question. For each \
             passage output one line in the form `index: score`, where score \
             is {}. Output nothing else.\n\nQuestion: {}\n\n",
            scale_line, query
        );
        for (i, candidate) in candidates.iter().enumerate() {
            prompt.push_str(&format!("Passage {}:\n{}\n\n", i + 1, candidate.content));
        }
        prompt
    }

    fn normalize(&self, raw: f32) -> f32 {
        let unit = match self.scale {
            RerankScale::ZeroToTen => raw / 10.0,
            RerankScale::UnitInterval => raw,
        };
        unit.clamp(0.0, 1.0)
    }
}

/// Pull `index: score` pairs out of model output, tolerating stray prose
/// around them. Indices outside 1..=len are discarded.
fn parse_scores(text: &str, len: usize) -> AHashMap<usize, f32> {
    // Also accepts "Passage 3: 7" style lines
    let line_re = Regex::new(r"(?m)^\s*(?:[Pp]assage\s+)?(\d+)\s*[:\-]\s*(\d+(?:\.\d+)?)\s*$")
        .expect("rerank score pattern");

    let mut scores = AHashMap::new();
    for capture in line_re.captures_iter(text) {
        let index: usize = match capture[1].parse() {
            Ok(i) => i,
            Err(_) => continue,
        };
        let score: f32 = match capture[2].parse() {
            Ok(s) => s,
            Err(_) => continue,
        };
        if (1..=len).contains(&index) {
            scores.insert(index, score);
        }
    }
    scores
}
