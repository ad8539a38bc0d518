//! Core data models used throughout the vault index.
//!
//! These types represent the documents, chunks, persisted chunk records and
//! scored retrieval results that flow through the indexing and retrieval
//! pipeline.

use serde::Serialize;

/// Heading label used when a document is stored as a single chunk.
pub const FULL_HEADING: &str = "(full)";

/// Classification of an indexed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// An ordinary note.
    Note,
    /// A structured log / journal entry.
    Log,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Note => "note",
            ContentType::Log => "log",
        }
    }

    /// Parse a stored value. Unknown values read back as [`ContentType::Note`].
    pub fn parse(value: &str) -> Self {
        match value {
            "log" => ContentType::Log,
            _ => ContentType::Note,
        }
    }

    /// Relevance prior used when a document does not declare one.
    pub fn default_confidence(&self) -> f64 {
        match self {
            ContentType::Note => 0.5,
            ContentType::Log => 0.3,
        }
    }
}

/// A source file of the vault, decoded and annotated.
#[derive(Debug, Clone)]
pub struct Document {
    /// Vault-relative, slash-normalized path.
    pub path: String,
    pub title: String,
    pub tags: Vec<String>,
    /// Body text with any front matter removed.
    pub text: String,
    /// Unix seconds.
    pub modified_at: i64,
    /// SHA-256 of the raw file text.
    pub content_hash: String,
    pub content_type: ContentType,
    pub confidence: f64,
}

/// A retrievable sub-unit of a [`Document`].
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub parent_path: String,
    pub ordinal: i64,
    /// Enclosing section title, or [`FULL_HEADING`].
    pub heading: String,
    /// Full section text, as stored.
    pub text: String,
    /// Text sent to the embedding provider (capped at `max_embed_chars`).
    pub embed_text: String,
    pub estimated_tokens: usize,
}

/// The persisted unit: a chunk plus document-level metadata.
///
/// The embedding vector is passed alongside records rather than inside them;
/// lite records simply have none.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub path: String,
    pub title: String,
    pub tags: Vec<String>,
    pub ordinal: i64,
    pub heading: String,
    pub text: String,
    pub modified_at: i64,
    pub content_hash: String,
    pub content_type: ContentType,
    pub confidence: f64,
    pub access_count: i64,
}

impl ChunkRecord {
    /// Build a fresh record (access count zero) for a chunk of `doc`.
    pub fn from_chunk(doc: &Document, chunk: &Chunk) -> Self {
        Self {
            path: doc.path.clone(),
            title: doc.title.clone(),
            tags: doc.tags.clone(),
            ordinal: chunk.ordinal,
            heading: chunk.heading.clone(),
            text: chunk.text.clone(),
            modified_at: doc.modified_at,
            content_hash: doc.content_hash.clone(),
            content_type: doc.content_type,
            confidence: doc.confidence,
            access_count: 0,
        }
    }
}

/// A retrieval result returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    pub path: String,
    pub title: String,
    pub ordinal: i64,
    pub heading: String,
    pub text: String,
    pub snippet: String,
    pub content_type: ContentType,
    /// Vector distance; `None` for keyword (lite) matches.
    pub distance: Option<f64>,
    pub composite_score: f64,
    pub estimated_tokens: usize,
}

/// A document that was skipped during a reindex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDocument {
    pub path: String,
    pub reason: String,
}

/// Per-run change counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub new: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

/// Statistics returned by a reindex.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    /// Documents present in the index after the run.
    pub documents: u64,
    /// Chunks present in the index after the run.
    pub chunks: u64,
    /// Chunks written by this run.
    pub chunks_written: u64,
    pub changes: ChangeCounts,
    pub skipped: Vec<SkippedDocument>,
    /// True when any document of this run was stored without vectors.
    pub lite_mode: bool,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}
