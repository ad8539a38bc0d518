//! Storage abstraction for the vault index.
//!
//! The [`Store`] trait is everything the reindexer and retriever need from
//! persistent storage. Two backends implement it:
//!
//! - [`InMemoryStore`]: `RwLock`-guarded maps, used by tests and embedders.
//! - [`SqliteStore`]: the durable backend behind the `vidx` binary.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`bulk_upsert`](Store::bulk_upsert) | Replace a path's chunk set, with vectors |
//! | [`bulk_upsert_lite`](Store::bulk_upsert_lite) | Replace a path's chunk set, without vectors |
//! | [`delete_by_path`](Store::delete_by_path) | Remove every chunk of a path |
//! | [`vector_search`](Store::vector_search) | L2 nearest neighbours, ascending distance |
//! | [`keyword_search`](Store::keyword_search) | Case-insensitive substring match |
//! | [`keyword_search_unembedded`](Store::keyword_search_unembedded) | Same, limited to chunks without a vector |
//! | [`note_count`](Store::note_count) / [`chunk_count`](Store::chunk_count) | Reporting |
//! | [`content_hashes`](Store::content_hashes) | path → hash snapshot for change detection |
//! | [`unembedded_paths`](Store::unembedded_paths) | Paths holding chunks without a vector |
//! | [`record_access`](Store::record_access) | Retrieval feedback |
//! | [`embedding_meta`](Store::embedding_meta) | Model and dimension of stored vectors |
//!
//! Replacing a path's chunk set must be atomic with respect to readers.
//! Access counts are carried over for ordinals that survive a replacement.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::change::HashSnapshot;
use crate::models::ChunkRecord;

/// A chunk returned by [`Store::vector_search`].
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub record: ChunkRecord,
    /// L2 distance to the query vector. Smaller is more similar.
    pub distance: f64,
}

/// Identity of a chunk: `(path, ordinal)`.
pub type ChunkKey = (String, i64);

/// The model that produced the stored vectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingMeta {
    pub model: String,
    pub dims: usize,
}

impl std::fmt::Display for EmbeddingMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} dims)", self.model, self.dims)
    }
}

/// Counts for `vidx stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub notes: u64,
    pub chunks: u64,
    pub embedded_chunks: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically replace all chunks of `path` with `records`, storing
    /// `vectors[i]` for `records[i]`.
    async fn bulk_upsert(
        &self,
        path: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Atomically replace all chunks of `path` with vector-less `records`.
    async fn bulk_upsert_lite(&self, path: &str, records: &[ChunkRecord]) -> Result<()>;

    /// Remove all chunks of `path`. Returns the number removed.
    async fn delete_by_path(&self, path: &str) -> Result<u64>;

    /// Up to `top_k` embedded chunks ordered by ascending distance.
    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkCandidate>>;

    /// Chunks whose text contains at least one whitespace-separated query
    /// term, case-insensitively, most matching terms first.
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkRecord>>;

    /// [`keyword_search`](Store::keyword_search) restricted to chunks stored
    /// without a vector, which vector search cannot reach.
    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>>;

    /// Number of distinct indexed paths.
    async fn note_count(&self) -> Result<u64>;

    async fn chunk_count(&self) -> Result<u64>;

    async fn counts(&self) -> Result<StoreCounts>;

    /// Path → content hash of every indexed document.
    async fn content_hashes(&self) -> Result<HashSnapshot>;

    /// Paths with at least one chunk stored without a vector.
    async fn unembedded_paths(&self) -> Result<HashSet<String>>;

    /// Increment the access count of each chunk in `keys`. Unknown keys are
    /// ignored.
    async fn record_access(&self, keys: &[ChunkKey]) -> Result<()>;

    async fn embedding_meta(&self) -> Result<Option<EmbeddingMeta>>;

    async fn set_embedding_meta(&self, meta: &EmbeddingMeta) -> Result<()>;
}

/// Lowercased, de-duplicated query terms.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for t in query.split_whitespace() {
        let t = t.to_lowercase();
        if !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

/// Order vector candidates by distance, then path and ordinal.
pub(crate) fn sort_candidates(candidates: &mut [ChunkCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.path.cmp(&b.record.path))
            .then_with(|| a.record.ordinal.cmp(&b.record.ordinal))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms() {
        assert_eq!(query_terms("Deploy the deploy  KEY"), vec!["deploy", "the", "key"]);
        assert!(query_terms("   ").is_empty());
    }
}
