//! Retrieval engine
//!
//! Drives one query through the full pipeline: expand, embed, search both
//! channels concurrently, fuse, hydrate, rerank, log. Optional stages
//! degrade to the previous stage's output instead of failing the query,
//! and each runs under a slice of the overall deadline so a hung provider
//! cannot consume the whole budget. The call only errors when no channel
//! produced anything searchable or the overall deadline is exceeded.

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingCache, EmbeddingProvider};
use crate::error::{RecollectError, Result};
use crate::lexical::LexicalBackend;
use crate::llm::CompletionProvider;
use crate::retrieval::expansion::QueryExpander;
use crate::retrieval::fusion::{fuse, ChannelKind, FusedHit, RankedList};
use crate::retrieval::query_log::RagQueryLog;
use crate::retrieval::reranker::{RerankCandidate, Reranker};
use crate::retrieval::{RetrievalOptions, SourceFlags};
use crate::storage::{ChunkRecord, Database};
use crate::vector::VectorStoreFacade;
use ahash::AHashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One chunk in the final result set
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub note_id: String,
    pub content: String,
    /// Fused score, or the reranker's score when reranking applied
    pub score: f32,
    pub sources: SourceFlags,
}

/// Result of one retrieve() call
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResponse {
    pub chunks: Vec<RetrievedChunk>,
    /// Query log id, for attaching feedback later
    pub log_id: String,
}

pub struct RetrievalEngine {
    database: Arc<Database>,
    vector_store: Arc<VectorStoreFacade>,
    lexical: Arc<dyn LexicalBackend>,
    cache: Arc<EmbeddingCache>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    completion_provider: Option<Arc<dyn CompletionProvider>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        database: Arc<Database>,
        vector_store: Arc<VectorStoreFacade>,
        lexical: Arc<dyn LexicalBackend>,
        cache: Arc<EmbeddingCache>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        completion_provider: Option<Arc<dyn CompletionProvider>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            database,
            vector_store,
            lexical,
            cache,
            embedding_provider,
            completion_provider,
            config,
        }
    }

    /// Run one query end to end under the configured deadline
    pub async fn retrieve(&self, user_id: &str, query: &str) -> Result<RetrievalResponse> {
        self.retrieve_with(user_id, query, RetrievalOptions::default())
            .await
    }

    /// Retrieve with per-call feature overrides
    pub async fn retrieve_with(
        &self,
        user_id: &str,
        query: &str,
        options: RetrievalOptions,
    ) -> Result<RetrievalResponse> {
        let config = options.apply(&self.config);
        let deadline = Duration::from_millis(config.query_timeout_ms);
        match tokio::time::timeout(deadline, self.run(user_id, query, &config)).await {
            Ok(result) => result,
            Err(_) => Err(RecollectError::Retrieval(format!(
                "query exceeded {}ms deadline",
                config.query_timeout_ms
            ))),
        }
    }

    async fn run(
        &self,
        user_id: &str,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<RetrievalResponse> {
        let started = Instant::now();
        let mut log = RagQueryLog::new(user_id, query);
        log.toggles.hybrid = config.enable_hybrid;

        let query = query.trim();
        if query.is_empty() {
            log.stage_timings.total_ms = started.elapsed().as_millis() as u64;
            let log_id = log.id.clone();
            self.persist_log(&log);
            return Ok(RetrievalResponse {
                chunks: Vec::new(),
                log_id,
            });
        }

        // Expansion: HyDE feeds only the vector channel (its output is a
        // pseudo-document, not a keyword query); rephrasings feed both.
        let expansion_started = Instant::now();
        let expander = self
            .completion_provider
            .as_ref()
            .map(|provider| QueryExpander::new(Arc::clone(provider), 256, 0.7));

        let mut rephrasings: Vec<String> = Vec::new();
        let mut hyde_doc: Option<String> = None;
        if let Some(expander) = &expander {
            let budget = stage_budget(config, 4);
            if config.enable_hyde {
                hyde_doc = match tokio::time::timeout(budget, expander.hyde(query)).await {
                    Ok(doc) => doc,
                    Err(_) => {
                        warn!("HyDE expansion timed out; searching the raw query");
                        None
                    }
                };
                log.toggles.hyde = hyde_doc.is_some();
            }
            if config.enable_multi_query {
                rephrasings = match tokio::time::timeout(
                    budget,
                    expander.multi_query(query, config.multi_query_count),
                )
                .await
                {
                    Ok(variants) => variants,
                    Err(_) => {
                        warn!("Multi-query expansion timed out; searching the raw query only");
                        Vec::new()
                    }
                };
                log.toggles.multi_query = !rephrasings.is_empty();
            }
        }

        // HyDE replaces the raw query in its vector channel; the raw query
        // still drives the lexical channel
        let mut vector_texts: Vec<String> =
            vec![hyde_doc.clone().unwrap_or_else(|| query.to_string())];
        vector_texts.extend(rephrasings.iter().cloned());

        let mut lexical_texts: Vec<String> = vec![query.to_string()];
        lexical_texts.extend(rephrasings.iter().cloned());

        log.channel_stats.query_variants = vector_texts.len();
        log.stage_timings.expansion_ms = expansion_started.elapsed().as_millis() as u64;

        // Embed every vector-channel variant through the cache
        let embedding_started = Instant::now();
        let embed_outcome = match tokio::time::timeout(
            stage_budget(config, 2),
            self.cache.embed_batch(&self.embedding_provider, &vector_texts),
        )
        .await
        {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(_) => Err("query embedding timed out".to_string()),
        };
        let embeddings = match embed_outcome {
            Ok(vectors) => vectors,
            Err(e) => {
                // Lexical-only degradation in hybrid mode, hard failure
                // otherwise
                warn!("Query embedding failed: {}", e);
                if !config.enable_hybrid {
                    return Err(RecollectError::Embedding(e));
                }
                log.channel_stats.vector_degraded = true;
                Vec::new()
            }
        };
        log.stage_timings.embedding_ms = embedding_started.elapsed().as_millis() as u64;

        // Both channels fan out concurrently; each variant is its own
        // ranked list for fusion
        let search_started = Instant::now();
        let fetch_k = (config.top_k * config.search_multiplier)
            .max(config.initial_retrieval_count);

        let vector_searches = embeddings.iter().map(|embedding| {
            let store = Arc::clone(&self.vector_store);
            let threshold = config.min_similarity_threshold;
            async move { store.search(embedding, user_id, fetch_k, threshold).await }
        });

        let lexical_queries: Vec<String> = if config.enable_hybrid {
            lexical_texts
        } else {
            Vec::new()
        };
        let lexical_budget = stage_budget(config, 2);
        let lexical_searches = lexical_queries.iter().map(|text| {
            let lexical = Arc::clone(&self.lexical);
            async move {
                match tokio::time::timeout(
                    lexical_budget,
                    lexical.search(text, user_id, fetch_k, false),
                )
                .await
                {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!(
                        "lexical search timed out after {}ms",
                        lexical_budget.as_millis()
                    )),
                }
            }
        });

        let (vector_outcomes, lexical_outcomes) =
            futures::join!(join_all(vector_searches), join_all(lexical_searches));

        let mut lists: Vec<RankedList> = Vec::new();
        let mut attempted = 0usize;
        let mut vector_scores: Vec<f32> = Vec::new();
        let mut lexical_scores: Vec<f32> = Vec::new();

        for outcome in vector_outcomes {
            attempted += 1;
            match outcome {
                Ok(hits) => {
                    log.channel_stats.vector_hits += hits.len();
                    vector_scores.extend(hits.iter().map(|h| h.score));
                    lists.push(RankedList {
                        kind: ChannelKind::Vector,
                        weight: config.semantic_weight,
                        hits: hits.into_iter().map(|h| (h.chunk_id, h.score)).collect(),
                    });
                }
                Err(e) => {
                    warn!("Vector search degraded: {}", e);
                    log.channel_stats.vector_degraded = true;
                }
            }
        }

        for outcome in lexical_outcomes {
            attempted += 1;
            match outcome {
                Ok(hits) => {
                    log.channel_stats.lexical_hits += hits.len();
                    lexical_scores.extend(hits.iter().map(|h| h.score));
                    lists.push(RankedList {
                        kind: ChannelKind::Lexical,
                        weight: config.lexical_weight,
                        hits: hits.into_iter().map(|h| (h.chunk_id, h.score)).collect(),
                    });
                }
                Err(e) => warn!("Lexical search degraded: {}", e),
            }
        }
        let (top, avg) = score_shape(&vector_scores);
        log.channel_stats.vector_top_score = top;
        log.channel_stats.vector_avg_score = avg;
        let (top, avg) = score_shape(&lexical_scores);
        log.channel_stats.lexical_top_score = top;
        log.channel_stats.lexical_avg_score = avg;
        log.stage_timings.search_ms = search_started.elapsed().as_millis() as u64;

        if lists.is_empty() && attempted > 0 {
            return Err(RecollectError::Retrieval(
                "every search channel failed".to_string(),
            ));
        }

        // Fuse and keep the candidate pool for reranking
        let fusion_started = Instant::now();
        let mut fused = fuse(&lists, config.rrf_k);
        fused.truncate(config.initial_retrieval_count);
        log.channel_stats.fused_candidates = fused.len();
        log.stage_timings.fusion_ms = fusion_started.elapsed().as_millis() as u64;

        // Hydrate contents from the store of record; hits whose chunk was
        // replaced since the search simply drop out
        let records = self
            .database
            .get_chunks(&fused.iter().map(|h| h.chunk_id).collect::<Vec<_>>())?;
        let by_id: AHashMap<i64, ChunkRecord> =
            records.into_iter().map(|r| (r.id, r)).collect();

        let mut chunks = self
            .rerank_or_keep(query, config, &fused, &by_id, &mut log)
            .await;
        chunks.truncate(config.top_k);
        log.channel_stats.returned = chunks.len();
        log.stage_timings.total_ms = started.elapsed().as_millis() as u64;

        info!(
            "Retrieved {} chunks for '{}' in {}ms (vector: {}, lexical: {})",
            chunks.len(),
            query,
            log.stage_timings.total_ms,
            log.channel_stats.vector_hits,
            log.channel_stats.lexical_hits
        );

        let log_id = log.id.clone();
        self.persist_log(&log);

        Ok(RetrievalResponse { chunks, log_id })
    }

    /// Apply the reranker when enabled, falling back to the fused order on
    /// any rerank failure
    async fn rerank_or_keep(
        &self,
        query: &str,
        config: &RetrievalConfig,
        fused: &[FusedHit],
        by_id: &AHashMap<i64, ChunkRecord>,
        log: &mut RagQueryLog,
    ) -> Vec<RetrievedChunk> {
        let fused_order = || {
            fused
                .iter()
                .filter_map(|hit| {
                    by_id.get(&hit.chunk_id).map(|record| RetrievedChunk {
                        chunk_id: hit.chunk_id,
                        note_id: record.note_id.clone(),
                        content: record.content.clone(),
                        score: hit.score,
                        sources: hit.sources,
                    })
                })
                .collect::<Vec<_>>()
        };

        let provider = match (&self.completion_provider, config.enable_reranking) {
            (Some(provider), true) => provider,
            _ => return fused_order(),
        };
        log.toggles.reranking = true;

        let rerank_started = Instant::now();
        let candidates: Vec<RerankCandidate> = fused
            .iter()
            .filter_map(|hit| {
                by_id.get(&hit.chunk_id).map(|record| RerankCandidate {
                    chunk_id: hit.chunk_id,
                    content: record.content.clone(),
                })
            })
            .collect();

        let reranker = Reranker::new(
            Arc::clone(provider),
            config.rerank_scale,
            config.min_rerank_score,
            512,
        );
        let outcome = match tokio::time::timeout(
            stage_budget(config, 4),
            reranker.rerank(query, &candidates),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Reranker timed out; keeping the fused order");
                None
            }
        };
        log.stage_timings.rerank_ms = rerank_started.elapsed().as_millis() as u64;

        match outcome {
            Some(reranked) => {
                log.toggles.rerank_applied = true;
                debug!("Reranker kept {}/{} candidates", reranked.len(), candidates.len());
                let sources: AHashMap<i64, SourceFlags> =
                    fused.iter().map(|h| (h.chunk_id, h.sources)).collect();
                reranked
                    .into_iter()
                    .filter_map(|hit| {
                        by_id.get(&hit.chunk_id).map(|record| RetrievedChunk {
                            chunk_id: hit.chunk_id,
                            note_id: record.note_id.clone(),
                            content: record.content.clone(),
                            score: hit.score,
                            sources: sources.get(&hit.chunk_id).copied().unwrap_or_default(),
                        })
                    })
                    .collect()
            }
            None => fused_order(),
        }
    }

    /// Log persistence is observability, never a reason to fail the query
    fn persist_log(&self, log: &RagQueryLog) {
        if let Err(e) = self.database.insert_query_log(log) {
            warn!("Failed to persist query log {}: {}", log.id, e);
        }
    }
}

/// Slice of the overall deadline granted to one stage. Optional stages
/// (expansion, rerank) get a quarter, channel work gets half.
fn stage_budget(config: &RetrievalConfig, divisor: u64) -> Duration {
    Duration::from_millis((config.query_timeout_ms / divisor).max(1))
}

fn score_shape(scores: &[f32]) -> (f32, f32) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let top = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let avg = scores.iter().sum::<f32>() / scores.len() as f32;
    (top, avg)
}
