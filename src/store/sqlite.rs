//! SQLite-backed [`Store`] implementation.
//!
//! All chunks live in one `chunks` table keyed by `(path, ordinal)` with an
//! optional `embedding` BLOB. Each path replacement runs in a single
//! transaction (delete then insert), so WAL readers see either the old or
//! the new chunk set. Vector search loads the embedded rows and ranks them
//! by L2 distance in process.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use super::{
    query_terms, sort_candidates, ChunkCandidate, ChunkKey, EmbeddingMeta, Store, StoreCounts,
};
use crate::change::HashSnapshot;
use crate::config::Config;
use crate::embedding::{blob_to_vec, l2_distance, vec_to_blob};
use crate::models::{ChunkRecord, ContentType};
use crate::{db, migrate};

const RECORD_COLUMNS: &str = "path, ordinal, title, tags_json, heading, text, modified_at, \
                              content_hash, content_type, confidence, access_count";

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and ensure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to initialize index schema")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn replace(
        &self,
        path: &str,
        records: &[ChunkRecord],
        vectors: Option<&[Vec<f32>]>,
    ) -> Result<()> {
        if let Some(v) = vectors {
            anyhow::ensure!(
                v.len() == records.len(),
                "{} vectors supplied for {} chunks of {}",
                v.len(),
                records.len(),
                path
            );
        }

        let mut tx = self.pool.begin().await?;

        let previous: HashMap<i64, i64> =
            sqlx::query("SELECT ordinal, access_count FROM chunks WHERE path = ?")
                .bind(path)
                .fetch_all(&mut *tx)
                .await?
                .iter()
                .map(|row| (row.get("ordinal"), row.get("access_count")))
                .collect();

        sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        for (i, record) in records.iter().enumerate() {
            let access_count = previous
                .get(&record.ordinal)
                .map(|prev| record.access_count.max(*prev))
                .unwrap_or(record.access_count);
            let blob = vectors.map(|v| vec_to_blob(&v[i]));
            let tags_json = serde_json::to_string(&record.tags)?;

            sqlx::query(
                r#"
                INSERT INTO chunks (path, ordinal, title, tags_json, heading, text, modified_at,
                                    content_hash, content_type, confidence, access_count, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(path)
            .bind(record.ordinal)
            .bind(&record.title)
            .bind(&tags_json)
            .bind(&record.heading)
            .bind(&record.text)
            .bind(record.modified_at)
            .bind(&record.content_hash)
            .bind(record.content_type.as_str())
            .bind(record.confidence)
            .bind(access_count)
            .bind(blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Chunks ranked by how many query terms their text contains.
    async fn keyword_hits(
        &self,
        query: &str,
        limit: usize,
        unembedded_only: bool,
    ) -> Result<Vec<ChunkRecord>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM (SELECT ");
        qb.push(RECORD_COLUMNS);
        qb.push(", (");
        for (i, term) in terms.into_iter().enumerate() {
            if i > 0 {
                qb.push(" + ");
            }
            qb.push("(instr(lower(text), ");
            qb.push_bind(term);
            qb.push(") > 0)");
        }
        qb.push(") AS hits FROM chunks");
        if unembedded_only {
            qb.push(" WHERE embedding IS NULL");
        }
        qb.push(") WHERE hits > 0 ORDER BY hits DESC, path, ordinal LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }
}

fn record_from_row(row: &SqliteRow) -> ChunkRecord {
    let tags_json: String = row.get("tags_json");
    let content_type: String = row.get("content_type");
    ChunkRecord {
        path: row.get("path"),
        title: row.get("title"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        ordinal: row.get("ordinal"),
        heading: row.get("heading"),
        text: row.get("text"),
        modified_at: row.get("modified_at"),
        content_hash: row.get("content_hash"),
        content_type: ContentType::parse(&content_type),
        confidence: row.get("confidence"),
        access_count: row.get("access_count"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn bulk_upsert(
        &self,
        path: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        self.replace(path, records, Some(vectors)).await
    }

    async fn bulk_upsert_lite(&self, path: &str, records: &[ChunkRecord]) -> Result<()> {
        self.replace(path, records, None).await
    }

    async fn delete_by_path(&self, path: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn vector_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ChunkCandidate>> {
        let sql = format!(
            "SELECT {}, embedding FROM chunks WHERE embedding IS NOT NULL",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = l2_distance(query, &blob_to_vec(&blob));
                distance.is_finite().then(|| ChunkCandidate {
                    record: record_from_row(row),
                    distance,
                })
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(top_k);
        Ok(candidates)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<ChunkRecord>> {
        self.keyword_hits(query, limit, false).await
    }

    async fn keyword_search_unembedded(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        self.keyword_hits(query, limit, true).await
    }

    async fn note_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn chunk_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT path) AS notes,
                   COUNT(*) AS chunks,
                   COUNT(embedding) AS embedded
            FROM chunks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let notes: i64 = row.get("notes");
        let chunks: i64 = row.get("chunks");
        let embedded: i64 = row.get("embedded");
        Ok(StoreCounts {
            notes: notes as u64,
            chunks: chunks as u64,
            embedded_chunks: embedded as u64,
        })
    }

    async fn content_hashes(&self) -> Result<HashSnapshot> {
        let rows = sqlx::query("SELECT path, MIN(content_hash) AS hash FROM chunks GROUP BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("path"), row.get("hash")))
            .collect())
    }

    async fn unembedded_paths(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT DISTINCT path FROM chunks WHERE embedding IS NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("path")).collect())
    }

    async fn record_access(&self, keys: &[ChunkKey]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (path, ordinal) in keys {
            sqlx::query(
                "UPDATE chunks SET access_count = access_count + 1 WHERE path = ? AND ordinal = ?",
            )
            .bind(path)
            .bind(ordinal)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn embedding_meta(&self) -> Result<Option<EmbeddingMeta>> {
        let rows = sqlx::query("SELECT key, value FROM index_meta WHERE key IN (?, ?)")
            .bind(META_MODEL)
            .bind(META_DIMS)
            .fetch_all(&self.pool)
            .await?;

        let mut model = None;
        let mut dims = None;
        for row in &rows {
            let key: String = row.get("key");
            let value: String = row.get("value");
            match key.as_str() {
                META_MODEL => model = Some(value),
                META_DIMS => dims = value.parse::<usize>().ok(),
                _ => {}
            }
        }

        Ok(match (model, dims) {
            (Some(model), Some(dims)) => Some(EmbeddingMeta { model, dims }),
            _ => None,
        })
    }

    async fn set_embedding_meta(&self, meta: &EmbeddingMeta) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(META_MODEL, meta.model.clone()), (META_DIMS, meta.dims.to_string())] {
            sqlx::query(
                r#"
                INSERT INTO index_meta (key, value) VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
