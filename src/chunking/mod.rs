//! Note chunker
//!
//! Splits note text into overlapping passages with stable, contiguous
//! indices. Pure: identical input always yields identical chunk boundaries,
//! and the original text is preserved verbatim inside each chunk.

use crate::config::{ChunkUnit, ChunkingConfig};

/// A chunk before it is embedded and persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    /// 0-based, contiguous per note
    pub chunk_index: usize,
    pub content: String,
}

/// Split a note into overlapping chunk drafts.
///
/// When a title or tags are given, the first chunk is prefixed with a short
/// header so lexical search can match on them. Empty or whitespace-only
/// text yields no chunks.
pub fn chunk_note(
    text: &str,
    title: Option<&str>,
    tags: &[String],
    config: &ChunkingConfig,
) -> Vec<ChunkDraft> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let pieces = match config.unit {
        ChunkUnit::Characters => split_by_characters(text, config.target_size, config.overlap),
        ChunkUnit::Words => split_by_words(text, config.target_size, config.overlap),
    };

    let header = note_header(title, tags);

    pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, content)| {
            let content = if chunk_index == 0 {
                match &header {
                    Some(h) => format!("{}\n{}", h, content),
                    None => content,
                }
            } else {
                content
            };
            ChunkDraft {
                chunk_index,
                content,
            }
        })
        .collect()
}

fn note_header(title: Option<&str>, tags: &[String]) -> Option<String> {
    let title = title.map(str::trim).filter(|t| !t.is_empty());
    match (title, tags.is_empty()) {
        (None, true) => None,
        (Some(t), true) => Some(t.to_string()),
        (None, false) => Some(tags.join(" ")),
        (Some(t), false) => Some(format!("{} [{}]", t, tags.join(" "))),
    }
}

/// Character-based splitting on char boundaries (never inside a code point)
fn split_by_characters(text: &str, target: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= target {
        return vec![text.to_string()];
    }

    let step = target - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + target).min(chars.len());
        chunks.push(chars[start..end].iter().collect());

        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Word-based splitting that slices the original text between word
/// boundaries, preserving interior whitespace
fn split_by_words(text: &str, target: usize, overlap: usize) -> Vec<String> {
    // Byte ranges of each whitespace-delimited word
    let words: Vec<(usize, usize)> = word_spans(text);
    if words.len() <= target {
        return vec![text.trim().to_string()];
    }

    let step = target - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < words.len() {
        let end = (start + target).min(words.len());
        let byte_start = words[start].0;
        let byte_end = words[end - 1].1;
        chunks.push(text[byte_start..byte_end].to_string());

        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(start) = word_start.take() {
                spans.push((start, idx));
            }
        } else if word_start.is_none() {
            word_start = Some(idx);
        }
    }

    if let Some(start) = word_start {
        spans.push((start, text.len()));
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(unit: ChunkUnit, target_size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            unit,
            target_size,
            overlap,
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let cfg = config(ChunkUnit::Characters, 100, 20);
        assert!(chunk_note("", None, &[], &cfg).is_empty());
        assert!(chunk_note("   \n\t  ", None, &[], &cfg).is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let cfg = config(ChunkUnit::Characters, 100, 20);
        let chunks = chunk_note("hello world", None, &[], &cfg);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "hello world");
    }

    #[test]
    fn test_indices_are_contiguous() {
        let cfg = config(ChunkUnit::Characters, 10, 3);
        let text = "abcdefghijklmnopqrstuvwxyz0123456789";
        let chunks = chunk_note(text, None, &[], &cfg);

        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_character_overlap() {
        let cfg = config(ChunkUnit::Characters, 10, 4);
        let text = "abcdefghijklmnopqrst";
        let chunks = chunk_note(text, None, &[], &cfg);

        // Step is 6, so chunk 1 starts at char 6 and repeats chars 6..10
        assert_eq!(chunks[0].content, "abcdefghij");
        assert!(chunks[1].content.starts_with("ghij"));
    }

    #[test]
    fn test_deterministic() {
        let cfg = config(ChunkUnit::Words, 5, 2);
        let text = "one two three four five six seven eight nine ten";
        let a = chunk_note(text, None, &[], &cfg);
        let b = chunk_note(text, None, &[], &cfg);
        assert_eq!(a, b);
    }

    #[test]
    fn test_word_chunks_preserve_original_spacing() {
        let cfg = config(ChunkUnit::Words, 3, 1);
        let text = "alpha  beta\tgamma delta epsilon";
        let chunks = chunk_note(text, None, &[], &cfg);

        assert_eq!(chunks[0].content, "alpha  beta\tgamma");
        assert!(chunks[1].content.starts_with("gamma"));
    }

    #[test]
    fn test_title_and_tags_prefix_first_chunk_only() {
        let cfg = config(ChunkUnit::Characters, 10, 2);
        let text = "abcdefghijklmnopqrst";
        let tags = vec!["rust".to_string(), "notes".to_string()];
        let chunks = chunk_note(text, Some("My Note"), &tags, &cfg);

        assert!(chunks[0].content.starts_with("My Note [rust notes]\n"));
        assert!(!chunks[1].content.contains("My Note"));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let cfg = config(ChunkUnit::Characters, 4, 1);
        let text = "héllo wörld émoji ✓ done";
        let chunks = chunk_note(text, None, &[], &cfg);

        // Every boundary must be a valid char boundary; reassembly of
        // non-overlapping prefixes must stay inside the original text
        for chunk in &chunks {
            assert!(text.contains(chunk.content.as_str()));
        }
    }
}
