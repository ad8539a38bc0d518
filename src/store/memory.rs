//! In-memory [`Store`] implementation.
//!
//! Chunk sets live in a `BTreeMap` keyed by path behind one
//! `std::sync::RwLock`, so a replacement is a single map insert and readers
//! never see half of it. Vector search is brute-force L2.
//!
//! Every mutating call bumps a write counter, which tests use to assert that
//! an unchanged vault causes no writes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{
    query_terms, sort_candidates, ChunkCandidate, ChunkKey, EmbeddingMeta, Store, StoreCounts,
};
use crate::change::HashSnapshot;
use crate::embedding::l2_distance;
use crate::models::ChunkRecord;

#[derive(Debug, Clone)]
struct StoredChunk {
    record: ChunkRecord,
    vector: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    paths: BTreeMap<String, Vec<StoredChunk>>,
    meta: Option<EmbeddingMeta>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    writes: AtomicU64,
    deletes: RwLock<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls made so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every path passed to [`Store::delete_by_path`], in call order.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deletes.read().map(|d| d.clone()).unwrap_or_default()
    }

    /// Snapshot of the chunk records of one path.
    pub fn records(&self, path: &str) -> Vec<ChunkRecord> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .paths
                    .get(path)
                    .map(|chunks| chunks.iter().map(|c| c.record.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Whether every chunk of `path` has a vector.
    pub fn has_vectors(&self, path: &str) -> bool {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .paths
                    .get(path)
                    .map(|chunks| chunks.iter().all(|c| c.vector.is_some()))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    fn replace(&self, path: &str, records: &[ChunkRecord], vectors: Option<&[Vec<f32>]>) -> Result<()> {
        if let Some(v) = vectors {
            if v.len() != records.len() {
                bail!(
                    "{} vectors supplied for {} chunks of {}",
                    v.len(),
                    records.len(),
                    path
                );
            }
        }

        let mut inner = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        let previous: HashMap<i64, i64> = inner
            .paths
            .get(path)
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|c| (c.record.ordinal, c.record.access_count))
                    .collect()
            })
            .unwrap_or_default();

        let chunks: Vec<StoredChunk> = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let mut record = r.clone();
                record.path = path.to_string();
                if let Some(prev) = previous.get(&record.ordinal) {
                    record.access_count = record.access_count.max(*prev);
                }
                StoredChunk {
                    record,
                    vector: vectors.map(|v| v[i].clone()),
                }
            })
            .collect();

        if chunks.is_empty() {
            inner.paths.remove(path);
        } else {
            inner.paths.insert(path.to_string(), chunks);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn keyword_hits(
        &self,
        query: &str,
        limit: usize,
        unembedded_only: bool,
    ) -> Result<Vec<ChunkRecord>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let mut hits: Vec<(usize, &ChunkRecord)> = inner
            .paths
            .values()
            .flatten()
            .filter(|c| !unembedded_only || c.vector.is_none())
            .filter_map(|c| {
                let text = c.record.text.to_lowercase();
                let n = terms.iter().filter(|t| text.contains(t.as_str())).count();
                (n > 0).then_some((n, &c.record))
            })
            .collect();
        hits.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(hits.into_iter().take(limit).map(|(_, r)| r.clone()).collect())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn bulk_upsert(
        &self,
        path: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        self.replace(path, records, Some(vectors))
    }

    async fn bulk_upsert_lite(&self, path: &str, records: &[ChunkRecord]) -> Result<()> {
        self.replace(path, records, None)
    }

    async fn delete_by_path(&self, path: &str) -> Result<u64> {
        let removed = {
            let mut inner = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
            inner.paths.remove(path).map(|c| c.len() as u64).unwrap_or(0)
        };
        if let Ok(mut d) = self.deletes.write() {
            d.push(path.to_string());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let mut candidates: Vec<ChunkCandidate> = inner
            .paths
            .values()
            .flatten()
            .filter_map(|c| {
                c.vector.as_ref().map(|v| ChunkCandidate {
                    record: c.record.clone(),
                    distance: l2_distance(query, v),
                })
            })
            .filter(|c| c.distance.is_finite())
            .collect();
        sort_candidates(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        self.keyword_hits(query, limit, false)
    }

    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        self.keyword_hits(query, limit, true)
    }

    async fn note_count(&self) -> Result<u64> {
        Ok(self.read()?.paths.len() as u64)
    }

    async fn chunk_count(&self) -> Result<u64> {
        Ok(self.read()?.paths.values().map(|c| c.len() as u64).sum())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.read()?;
        let all = inner.paths.values().flatten();
        Ok(StoreCounts {
            notes: inner.paths.len() as u64,
            chunks: inner.paths.values().map(|c| c.len() as u64).sum(),
            embedded_chunks: all.filter(|c| c.vector.is_some()).count() as u64,
        })
    }

    async fn content_hashes(&self) -> Result<HashSnapshot> {
        let inner = self.read()?;
        Ok(inner
            .paths
            .iter()
            .filter_map(|(path, chunks)| {
                chunks
                    .first()
                    .map(|c| (path.clone(), c.record.content_hash.clone()))
            })
            .collect())
    }

    async fn unembedded_paths(&self) -> Result<HashSet<String>> {
        let inner = self.read()?;
        Ok(inner
            .paths
            .iter()
            .filter(|(_, chunks)| chunks.iter().any(|c| c.vector.is_none()))
            .map(|(path, _)| path.clone())
            .collect())
    }

    async fn record_access(&self, keys: &[ChunkKey]) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        for (path, ordinal) in keys {
            if let Some(chunks) = inner.paths.get_mut(path) {
                if let Some(c) = chunks.iter_mut().find(|c| c.record.ordinal == *ordinal) {
                    c.record.access_count += 1;
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn embedding_meta(&self) -> Result<Option<EmbeddingMeta>> {
        Ok(self.read()?.meta.clone())
    }

    async fn set_embedding_meta(&self, meta: &EmbeddingMeta) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| anyhow!("store lock poisoned"))?;
        inner.meta = Some(meta.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentType;

    fn record(path: &str, ordinal: i64, text: &str) -> ChunkRecord {
        ChunkRecord {
            path: path.to_string(),
            title: path.to_string(),
            tags: Vec::new(),
            ordinal,
            heading: "(full)".to_string(),
            text: text.to_string(),
            modified_at: 0,
            content_hash: format!("hash-{}", path),
            content_type: ContentType::Note,
            confidence: 0.5,
            access_count: 0,
        }
    }

    #[tokio::test]
    async fn test_replace_is_wholesale() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "x"), record("a.md", 1, "y")])
            .await
            .unwrap();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "z")])
            .await
            .unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), 1);
        assert_eq!(store.records("a.md")[0].text, "z");
    }

    #[tokio::test]
    async fn test_delete_reports_removed_chunks() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "x"), record("a.md", 1, "y")])
            .await
            .unwrap();
        assert_eq!(store.delete_by_path("a.md").await.unwrap(), 2);
        assert_eq!(store.delete_by_path("a.md").await.unwrap(), 0);
        assert_eq!(store.note_count().await.unwrap(), 0);
        assert_eq!(store.deleted_paths(), vec!["a.md", "a.md"]);
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_distance() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert("a.md", &[record("a.md", 0, "a")], &[vec![0.0, 0.0]])
            .await
            .unwrap();
        store
            .bulk_upsert("b.md", &[record("b.md", 0, "b")], &[vec![3.0, 4.0]])
            .await
            .unwrap();
        store
            .bulk_upsert_lite("c.md", &[record("c.md", 0, "c")])
            .await
            .unwrap();

        let hits = store.vector_search(&[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.path, "a.md");
        assert_eq!(hits[0].distance, 1.0);
        assert!(hits[1].distance > 4.0);
    }

    #[tokio::test]
    async fn test_access_counts_survive_replacement() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "x")])
            .await
            .unwrap();
        store.record_access(&[("a.md".into(), 0)]).await.unwrap();
        store.record_access(&[("a.md".into(), 0)]).await.unwrap();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "x2"), record("a.md", 1, "y")])
            .await
            .unwrap();
        let recs = store.records("a.md");
        assert_eq!(recs[0].access_count, 2);
        assert_eq!(recs[1].access_count, 0);
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_by_terms() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert_lite("a.md", &[record("a.md", 0, "Deploy the service")])
            .await
            .unwrap();
        store
            .bulk_upsert_lite("b.md", &[record("b.md", 0, "service only")])
            .await
            .unwrap();
        let hits = store.keyword_search("deploy service", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.md");
    }

    #[tokio::test]
    async fn test_unembedded_chunks_are_tracked() {
        let store = InMemoryStore::new();
        store
            .bulk_upsert("a.md", &[record("a.md", 0, "service a")], &[vec![0.0]])
            .await
            .unwrap();
        store
            .bulk_upsert_lite("b.md", &[record("b.md", 0, "service b")])
            .await
            .unwrap();

        let missing = store.unembedded_paths().await.unwrap();
        assert_eq!(missing, HashSet::from(["b.md".to_string()]));
        let hits = store.keyword_search_unembedded("service", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.md");
    }

    #[tokio::test]
    async fn test_mismatched_vectors_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .bulk_upsert("a.md", &[record("a.md", 0, "x")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vectors"));
        assert_eq!(store.write_count(), 0);
    }
}
