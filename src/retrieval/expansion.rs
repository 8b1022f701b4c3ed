//! Query expansion
//!
//! Two optional LLM-backed expansions run before search: HyDE writes a
//! short hypothetical answer whose embedding often lands closer to real
//! note chunks than the question does, and multi-query rephrases the
//! question from different angles. Both degrade to the original query
//! when the provider fails; expansion never fails a retrieval.

use crate::llm::{CompletionProvider, CompletionRequest};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct QueryExpander {
    provider: Arc<dyn CompletionProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl QueryExpander {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            provider,
            max_tokens,
            temperature,
        }
    }

    /// Write a hypothetical answer for the query; None when the provider
    /// fails or returns nothing usable
    pub async fn hyde(&self, query: &str) -> Option<String> {
        let prompt = format!(
            "Write a short passage (2-4 sentences) that would plausibly appear \
             in someone's personal notes and directly answers the question below. \
             Write only the passage, no preamble.\n\nQuestion: {}",
            query
        );

        match self.complete(prompt).await {
            Some(text) if !text.trim().is_empty() => {
                debug!("HyDE produced {} chars", text.len());
                Some(text.trim().to_string())
            }
            _ => {
                warn!("HyDE expansion unavailable, searching with the raw query");
                None
            }
        }
    }

    /// Rephrase the query up to `count` ways; empty when the provider fails
    pub async fn multi_query(&self, query: &str, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let prompt = format!(
            "Rewrite the search query below in {} different ways that keep its \
             meaning but use different wording. Output one rewrite per line, \
             nothing else.\n\nQuery: {}",
            count, query
        );

        let Some(text) = self.complete(prompt).await else {
            warn!("Multi-query expansion unavailable, searching with the raw query");
            return Vec::new();
        };

        let variants = parse_variants(&text, query, count);
        debug!("Multi-query produced {} variants", variants.len());
        variants
    }

    async fn complete(&self, prompt: String) -> Option<String> {
        let request = CompletionRequest {
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        match self.provider.complete(request).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Expansion completion failed: {}", e);
                None
            }
        }
    }
}

/// Extract rewrites from model output: one per line, numbering and bullet
/// prefixes stripped, duplicates of each other or the original dropped
fn parse_variants(text: &str, original: &str, count: usize) -> Vec<String> {
    let original_lower = original.trim().to_lowercase();
    let mut variants: Vec<String> = Vec::new();

    for line in text.lines() {
        let cleaned = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-')
            .trim()
            .trim_matches('"');

        if cleaned.is_empty() || cleaned.to_lowercase() == original_lower {
            continue;
        }
        if variants.iter().any(|v: &String| v.eq_ignore_ascii_case(cleaned)) {
            continue;
        }

        variants.push(cleaned.to_string());
        if variants.len() == count {
            break;
        }
    }

    variants
}
