//! Section-boundary document chunker.
//!
//! Splits a document's body into [`Chunk`]s at second-level (`## `)
//! headings. Documents shorter than the configured threshold are kept
//! whole under the [`FULL_HEADING`] label.
//!
//! # Algorithm
//!
//! 1. If the body has fewer than `threshold_chars` characters, emit one
//!    chunk labeled `(full)`.
//! 2. Otherwise scan line by line, starting a new section at every `## `
//!    heading that is not inside a fenced code block.
//! 3. Text before the first heading becomes its own chunk, labeled with the
//!    document title. A long document without any `## ` heading stays whole.
//! 4. Each chunk keeps its full text; only `embed_text` is capped at
//!    `max_embed_chars`.
//!
//! Ordinals are contiguous from 0 and depend only on the text, so chunking
//! the same document twice yields the same sequence.
//!
//! # Example
//!
//! ```rust
//! use vault_index::chunk::{chunk_document, ChunkParams};
//! # use vault_index::models::{ContentType, Document};
//! # let doc = Document {
//! #     path: "notes/a.md".into(), title: "a".into(), tags: vec![],
//! #     text: "short note".into(), modified_at: 0, content_hash: String::new(),
//! #     content_type: ContentType::Note, confidence: 0.5,
//! # };
//! let chunks = chunk_document(&doc, &ChunkParams::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].heading, "(full)");
//! ```

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document, FULL_HEADING};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Chunking limits, decoupled from application config.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    pub threshold_chars: usize,
    pub max_embed_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        let c = ChunkingConfig::default();
        Self::from(&c)
    }
}

impl From<&ChunkingConfig> for ChunkParams {
    fn from(c: &ChunkingConfig) -> Self {
        Self {
            threshold_chars: c.threshold_chars,
            max_embed_chars: c.max_embed_chars,
        }
    }
}

/// Split a document into an ordered sequence of chunks.
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> Vec<Chunk> {
    let text = doc.text.as_str();

    if text.chars().count() < params.threshold_chars {
        return vec![make_chunk(&doc.path, 0, FULL_HEADING, text.trim(), params)];
    }

    let sections = split_sections(text);
    if sections.iter().all(|s| s.heading.is_none()) {
        return vec![make_chunk(&doc.path, 0, FULL_HEADING, text.trim(), params)];
    }

    let mut chunks = Vec::with_capacity(sections.len());
    for section in sections {
        let body = section.text.trim();
        if body.is_empty() {
            continue;
        }
        let heading = section.heading.unwrap_or(doc.title.as_str());
        let ordinal = chunks.len() as i64;
        chunks.push(make_chunk(&doc.path, ordinal, heading, body, params));
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(&doc.path, 0, FULL_HEADING, text.trim(), params));
    }

    chunks
}

struct Section<'a> {
    heading: Option<&'a str>,
    text: String,
}

fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = vec![Section {
        heading: None,
        text: String::new(),
    }];
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        }

        if !in_fence {
            if let Some(title) = h2_title(line) {
                sections.push(Section {
                    heading: Some(title),
                    text: String::new(),
                });
            }
        }

        // sections is never empty
        if let Some(current) = sections.last_mut() {
            current.text.push_str(line);
            current.text.push('\n');
        }
    }

    sections
}

/// Title of a `## ` heading line, or `None` for any other line.
fn h2_title(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("## ")?;
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

fn make_chunk(path: &str, ordinal: i64, heading: &str, text: &str, params: &ChunkParams) -> Chunk {
    Chunk {
        parent_path: path.to_string(),
        ordinal,
        heading: heading.to_string(),
        text: text.to_string(),
        embed_text: truncate_chars(text, params.max_embed_chars).to_string(),
        estimated_tokens: estimate_tokens(text),
    }
}

/// Estimated token cost of a piece of text (`ceil(chars / 4)`).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Display excerpt: whitespace collapsed, at most `max_chars` characters.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    if max_chars <= 3 {
        return truncate_chars(&collapsed, max_chars).to_string();
    }
    let mut out = truncate_chars(&collapsed, max_chars - 3).trim_end().to_string();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;

    fn doc(text: &str) -> Document {
        Document {
            path: "notes/a.md".to_string(),
            title: "A".to_string(),
            tags: Vec::new(),
            text: text.to_string(),
            modified_at: 0,
            content_hash: String::new(),
            content_type: ContentType::Note,
            confidence: 0.5,
        }
    }

    fn params(threshold: usize, max_embed: usize) -> ChunkParams {
        ChunkParams {
            threshold_chars: threshold,
            max_embed_chars: max_embed,
        }
    }

    #[test]
    fn test_short_document_is_single_full_chunk() {
        let text = "## One\nfirst\n## Two\nsecond part of it";
        let chunks = chunk_document(&doc(text), &params(1500, 8000));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].heading, FULL_HEADING);
        assert!(chunks[0].text.contains("second part"));
    }

    #[test]
    fn test_splits_on_h2_headings() {
        let text = "intro line\n\n## Alpha\nalpha body\n\n### Sub\nnested\n## Beta\nbeta body\n";
        let chunks = chunk_document(&doc(text), &params(10, 8000));
        let headings: Vec<&str> = chunks.iter().map(|c| c.heading.as_str()).collect();
        assert_eq!(headings, vec!["A", "Alpha", "Beta"]);
        assert!(chunks[1].text.contains("### Sub"));
        assert!(chunks[1].text.starts_with("## Alpha"));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as i64);
            assert_eq!(c.parent_path, "notes/a.md");
        }
    }

    #[test]
    fn test_empty_preamble_is_dropped() {
        let text = "## Alpha\nalpha body\n## Beta\nbeta body\n";
        let chunks = chunk_document(&doc(text), &params(10, 8000));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "Alpha");
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn test_heading_inside_code_fence_does_not_split() {
        let text = "## Real\n```\n## not a heading\n```\nafter\n";
        let chunks = chunk_document(&doc(text), &params(10, 8000));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "Real");
        assert!(chunks[0].text.contains("## not a heading"));
    }

    #[test]
    fn test_long_document_without_headings_stays_whole() {
        let text = "word ".repeat(100);
        let chunks = chunk_document(&doc(&text), &params(10, 8000));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, FULL_HEADING);
    }

    #[test]
    fn test_embed_text_is_capped_but_text_is_not() {
        let body = "x".repeat(500);
        let text = format!("## Big\n{}\n## Small\ny\n", body);
        let chunks = chunk_document(&doc(&text), &params(10, 100));
        assert_eq!(chunks[0].embed_text.chars().count(), 100);
        assert!(chunks[0].text.chars().count() > 500);
        assert_eq!(chunks[1].embed_text, chunks[1].text);
    }

    #[test]
    fn test_deterministic() {
        let text = "pre\n## A\na\n## B\nb\n## C\nc\n";
        let c1 = chunk_document(&doc(text), &params(5, 8000));
        let c2 = chunk_document(&doc(text), &params(5, 8000));
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_snippet_bounded() {
        let s = snippet("a  b\n\nc d e f g h i j", 9);
        assert!(s.chars().count() <= 9);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short", 240), "short");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
