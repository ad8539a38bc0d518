//! Contract tests for the SQLite store on a temporary database.

use std::path::Path;
use tempfile::TempDir;

use vault_index::config::Config;
use vault_index::models::{ChunkRecord, ContentType};
use vault_index::store::{EmbeddingMeta, SqliteStore, Store};

fn config(dir: &Path) -> Config {
    let text = format!(
        "[db]\npath = '{}'\n\n[vault]\nroot = '{}'\n",
        dir.join("data/index.sqlite").display(),
        dir.display()
    );
    toml::from_str(&text).unwrap()
}

fn record(path: &str, ordinal: i64, text: &str) -> ChunkRecord {
    ChunkRecord {
        path: path.to_string(),
        title: "Title".to_string(),
        tags: vec!["ops".to_string(), "deploy".to_string()],
        ordinal,
        heading: format!("Section {}", ordinal),
        text: text.to_string(),
        modified_at: 1_700_000_000,
        content_hash: format!("hash-{}", path),
        content_type: ContentType::Note,
        confidence: 0.5,
        access_count: 0,
    }
}

async fn open() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(tmp.path())).await.unwrap();
    (tmp, store)
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let first = SqliteStore::open(&cfg).await.unwrap();
    first.pool().close().await;
    let second = SqliteStore::open(&cfg).await.unwrap();
    assert_eq!(second.chunk_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_upsert_replaces_chunk_set() {
    let (_tmp, store) = open().await;
    store
        .bulk_upsert_lite(
            "notes/a.md",
            &[record("notes/a.md", 0, "one"), record("notes/a.md", 1, "two")],
        )
        .await
        .unwrap();
    assert_eq!(store.chunk_count().await.unwrap(), 2);

    store
        .bulk_upsert_lite("notes/a.md", &[record("notes/a.md", 0, "only")])
        .await
        .unwrap();
    assert_eq!(store.chunk_count().await.unwrap(), 1);
    assert_eq!(store.note_count().await.unwrap(), 1);

    let hashes = store.content_hashes().await.unwrap();
    assert_eq!(hashes.get("notes/a.md").map(String::as_str), Some("hash-notes/a.md"));
}

#[tokio::test]
async fn test_vector_search_orders_by_distance() {
    let (_tmp, store) = open().await;
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

    let hits = store.vector_search(&[0.0, 0.0], 10).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.path, "a.md");
    assert_eq!(hits[0].distance, 0.0);
    assert_eq!(hits[1].record.path, "b.md");
    assert_eq!(hits[1].distance, 5.0);
    assert_eq!(hits[1].record.tags, vec!["ops".to_string(), "deploy".to_string()]);

    let top = store.vector_search(&[0.0, 0.0], 1).await.unwrap();
    assert_eq!(top.len(), 1);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.chunks, 3);
    assert_eq!(counts.embedded_chunks, 2);
}

#[tokio::test]
async fn test_keyword_search_ranks_by_matched_terms() {
    let (_tmp, store) = open().await;
    store
        .bulk_upsert_lite("a.md", &[record("a.md", 0, "Rotate the DEPLOY key")])
        .await
        .unwrap();
    store
        .bulk_upsert_lite("b.md", &[record("b.md", 0, "deploy pipeline")])
        .await
        .unwrap();
    store
        .bulk_upsert_lite("c.md", &[record("c.md", 0, "unrelated")])
        .await
        .unwrap();

    let hits = store.keyword_search("deploy key", 10).await.unwrap();
    let paths: Vec<&str> = hits.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["a.md", "b.md"]);
    assert!(store.keyword_search("   ", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_by_path() {
    let (_tmp, store) = open().await;
    store
        .bulk_upsert_lite(
            "a.md",
            &[record("a.md", 0, "x"), record("a.md", 1, "y")],
        )
        .await
        .unwrap();
    store
        .bulk_upsert_lite("b.md", &[record("b.md", 0, "z")])
        .await
        .unwrap();

    assert_eq!(store.delete_by_path("a.md").await.unwrap(), 2);
    assert_eq!(store.delete_by_path("a.md").await.unwrap(), 0);
    assert_eq!(store.chunk_count().await.unwrap(), 1);
    assert!(!store.content_hashes().await.unwrap().contains_key("a.md"));
}

#[tokio::test]
async fn test_access_counts_survive_replacement() {
    let (_tmp, store) = open().await;
    store
        .bulk_upsert_lite(
            "a.md",
            &[record("a.md", 0, "x"), record("a.md", 1, "y")],
        )
        .await
        .unwrap();
    store
        .record_access(&[
            ("a.md".to_string(), 0),
            ("a.md".to_string(), 0),
            ("a.md".to_string(), 1),
            ("missing.md".to_string(), 0),
        ])
        .await
        .unwrap();

    store
        .bulk_upsert_lite("a.md", &[record("a.md", 0, "x2")])
        .await
        .unwrap();
    let hits = store.keyword_search("x2", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].access_count, 2);
}

#[tokio::test]
async fn test_embedding_meta_roundtrip() {
    let (_tmp, store) = open().await;
    assert_eq!(store.embedding_meta().await.unwrap(), None);

    let meta = EmbeddingMeta {
        model: "nomic-embed-text".to_string(),
        dims: 768,
    };
    store.set_embedding_meta(&meta).await.unwrap();
    assert_eq!(store.embedding_meta().await.unwrap(), Some(meta));

    let next = EmbeddingMeta {
        model: "text-embedding-3-small".to_string(),
        dims: 1536,
    };
    store.set_embedding_meta(&next).await.unwrap();
    assert_eq!(store.embedding_meta().await.unwrap(), Some(next));
}

#[tokio::test]
async fn test_mismatched_vector_count_is_rejected() {
    let (_tmp, store) = open().await;
    let err = store
        .bulk_upsert(
            "a.md",
            &[record("a.md", 0, "x"), record("a.md", 1, "y")],
            &[vec![1.0]],
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("vectors"));
    assert_eq!(store.chunk_count().await.unwrap(), 0);
}
