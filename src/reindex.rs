//! Reindex orchestration.
//!
//! Reconciles the store with the vault: enumerate or take the given paths,
//! compare content hashes against a snapshot taken up front, chunk and embed
//! what changed, and delete what disappeared.
//!
//! ```text
//! snapshot = store.content_hashes()
//! for each deleted path        → delete_by_path
//! for each present document    → load → classify
//!     Unchanged                → skip (no provider call, no write)
//!     Unchanged, vector-less   → chunk → embed → bulk_upsert (vector runs only)
//!     New | Changed            → chunk → embed → bulk_upsert
//!                                  degraded → bulk_upsert_lite (sticky for the run)
//! ```
//!
//! Per-document failures (unreadable file, not UTF-8) are recorded in
//! [`IndexStats::skipped`] and never abort the batch. A store failure or a
//! fatal embedding error aborts immediately; documents already replaced stay
//! consistent because each replacement is atomic.
//!
//! Only one reindex runs at a time per [`Reindexer`]; concurrent calls wait.
//! Cancellation is honoured between documents.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change::{classify, plan_full_scan, ChangeKind, HashSnapshot};
use crate::chunk::{chunk_document, ChunkParams};
use crate::config::Config;
use crate::document::{load_document, DocumentError};
use crate::embedding::{EmbedError, Embedder};
use crate::models::{ChunkRecord, Document, IndexStats, SkippedDocument};
use crate::progress::{IndexProgress, ProgressMode, ProgressReporter};
use crate::store::{EmbeddingMeta, SqliteStore, Store};
use crate::vault::VaultFilter;

/// Fatal reindex outcomes.
#[derive(Debug, Error)]
pub enum ReindexError {
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
    #[error("vault error: {0:#}")]
    Vault(anyhow::Error),
    /// Stored vectors come from a different model; only a full reindex may
    /// replace them.
    #[error("index holds vectors from {stored} but the provider is {configured}; run a full reindex")]
    IndexDimensions {
        stored: EmbeddingMeta,
        configured: EmbeddingMeta,
    },
}

/// Which documents a run looks at.
enum Targets {
    Vault,
    Paths(Vec<String>),
}

/// What to do with one path.
enum Work {
    Delete(String),
    Index(String),
}

struct RunOptions {
    /// Rewrite documents even when their hash is unchanged.
    force: bool,
    /// Never call the embedder.
    lite: bool,
}

/// Keeps the store in sync with the vault.
pub struct Reindexer {
    store: Arc<dyn Store>,
    embedder: Embedder,
    vault: VaultFilter,
    params: ChunkParams,
    log_prefixes: Vec<String>,
    writer: Mutex<()>,
}

impl Reindexer {
    pub fn new(config: &Config, store: Arc<dyn Store>, embedder: Embedder) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            embedder,
            vault: VaultFilter::new(&config.vault)?,
            params: ChunkParams::from(&config.chunking),
            log_prefixes: config.vault.log_prefixes.clone(),
            writer: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn vault(&self) -> &VaultFilter {
        &self.vault
    }

    /// Reconcile the whole vault.
    ///
    /// With `full_scan` every document is re-chunked and re-embedded even if
    /// its hash is unchanged, which is also how an index built with another
    /// embedding model is replaced. Without it, unchanged documents cost
    /// nothing.
    pub async fn reindex(
        &self,
        full_scan: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexStats, ReindexError> {
        let opts = RunOptions {
            force: full_scan,
            lite: false,
        };
        self.run(Targets::Vault, opts, progress, cancel).await
    }

    /// Like [`reindex`](Self::reindex) but never embeds; all chunks are
    /// stored without vectors.
    pub async fn reindex_lite(
        &self,
        full_scan: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexStats, ReindexError> {
        let opts = RunOptions {
            force: full_scan,
            lite: true,
        };
        self.run(Targets::Vault, opts, progress, cancel).await
    }

    /// Reindex a set of vault-relative paths.
    ///
    /// A path that is missing on disk is a deletion: its chunks, and those
    /// of any indexed document below it, are removed.
    pub async fn reindex_paths(
        &self,
        paths: &[String],
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexStats, ReindexError> {
        let mut normalized: Vec<String> = paths.iter().map(|p| normalize_path(p)).collect();
        normalized.sort();
        normalized.dedup();
        normalized.retain(|p| !p.is_empty());
        let opts = RunOptions {
            force: false,
            lite: false,
        };
        self.run(Targets::Paths(normalized), opts, progress, cancel)
            .await
    }

    async fn run(
        &self,
        targets: Targets,
        opts: RunOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<IndexStats, ReindexError> {
        let _writer = self.writer.lock().await;

        let snapshot = self
            .store
            .content_hashes()
            .await
            .map_err(ReindexError::Store)?;
        let work = self.plan(targets, &snapshot)?;

        let mut stats = IndexStats::default();
        let mut lite = opts.lite || self.embedder.is_lite();
        if lite {
            stats.lite_mode = true;
        }

        let configured = self.embedder.provider().map(|p| EmbeddingMeta {
            model: p.model_name().to_string(),
            dims: p.dims(),
        });
        let mut meta_current = true;
        if let (false, Some(configured)) = (lite, &configured) {
            match self.store.embedding_meta().await.map_err(ReindexError::Store)? {
                Some(stored) if &stored != configured => {
                    if !opts.force {
                        return Err(ReindexError::IndexDimensions {
                            stored,
                            configured: configured.clone(),
                        });
                    }
                    info!("replacing {} vectors with {}", stored, configured);
                    meta_current = false;
                }
                Some(_) => {}
                None => meta_current = false,
            }
        }

        // Documents stored without vectors during an outage or after a
        // rejected input get embedded once the provider answers again.
        let unembedded = if lite {
            HashSet::new()
        } else {
            self.store
                .unembedded_paths()
                .await
                .map_err(ReindexError::Store)?
        };

        let total = work.len() as u64;
        for (i, item) in work.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("reindex cancelled after {} of {} documents", i, total);
                stats.cancelled = true;
                break;
            }

            let path = match item {
                Work::Delete(path) => {
                    self.delete(&path, &mut stats).await?;
                    path
                }
                Work::Index(path) => {
                    match load_document(self.vault.root(), &path, &self.log_prefixes) {
                        Ok(doc) => {
                            let previous = snapshot.get(&path).map(String::as_str);
                            let kind = classify(&doc.content_hash, previous);
                            match kind {
                                ChangeKind::New => stats.changes.new += 1,
                                ChangeKind::Changed => stats.changes.changed += 1,
                                _ => stats.changes.unchanged += 1,
                            }
                            let backfill = !lite
                                && kind == ChangeKind::Unchanged
                                && unembedded.contains(&path);
                            if backfill {
                                debug!("embedding vector-less document: {}", path);
                            }
                            if kind.needs_indexing() || opts.force || backfill {
                                let wrote_vectors = self
                                    .index_document(&doc, &mut lite, &mut stats)
                                    .await?;
                                if wrote_vectors && !meta_current {
                                    if let Some(meta) = &configured {
                                        self.store
                                            .set_embedding_meta(meta)
                                            .await
                                            .map_err(ReindexError::Store)?;
                                        meta_current = true;
                                    }
                                }
                            } else {
                                debug!("unchanged: {}", path);
                            }
                        }
                        Err(DocumentError::Missing) => {
                            if snapshot.contains_key(&path) {
                                self.delete(&path, &mut stats).await?;
                            }
                        }
                        Err(e) => {
                            warn!("skipping {}: {}", path, e);
                            stats.skipped.push(SkippedDocument {
                                path: path.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                    path
                }
            };

            progress.report(&IndexProgress {
                current: i as u64 + 1,
                total,
                path,
            });
        }

        stats.documents = self.store.note_count().await.map_err(ReindexError::Store)?;
        stats.chunks = self.store.chunk_count().await.map_err(ReindexError::Store)?;

        info!(
            "reindex: {} documents, {} chunks ({} new, {} changed, {} unchanged, {} deleted, {} skipped{})",
            stats.documents,
            stats.chunks,
            stats.changes.new,
            stats.changes.changed,
            stats.changes.unchanged,
            stats.changes.deleted,
            stats.skipped.len(),
            if stats.lite_mode { ", lite mode" } else { "" }
        );
        Ok(stats)
    }

    fn plan(&self, targets: Targets, snapshot: &HashSnapshot) -> Result<Vec<Work>, ReindexError> {
        match targets {
            Targets::Vault => {
                let on_disk = self.vault.scan_documents().map_err(ReindexError::Vault)?;
                let plan = plan_full_scan(snapshot, &on_disk);
                Ok(plan
                    .deleted
                    .into_iter()
                    .map(Work::Delete)
                    .chain(plan.present.into_iter().map(Work::Index))
                    .collect())
            }
            Targets::Paths(paths) => {
                let mut work = Vec::new();
                for path in paths {
                    let full = self.vault.root().join(&path);
                    if full.is_file() {
                        if self.vault.is_document(&path) {
                            work.push(Work::Index(path));
                        } else if snapshot.contains_key(&path) {
                            work.push(Work::Delete(path));
                        }
                    } else if full.exists() {
                        // a directory; its files arrive as their own paths
                        continue;
                    } else {
                        let prefix = format!("{}/", path);
                        let mut below: Vec<&String> =
                            snapshot.keys().filter(|k| k.starts_with(&prefix)).collect();
                        below.sort();
                        if below.is_empty() {
                            work.push(Work::Delete(path));
                        } else {
                            work.extend(below.into_iter().map(|k| Work::Delete(k.clone())));
                        }
                    }
                }
                Ok(work)
            }
        }
    }

    async fn delete(&self, path: &str, stats: &mut IndexStats) -> Result<(), ReindexError> {
        let removed = self
            .store
            .delete_by_path(path)
            .await
            .map_err(ReindexError::Store)?;
        if removed > 0 {
            debug!("deleted {} ({} chunks)", path, removed);
            stats.changes.deleted += 1;
        }
        Ok(())
    }

    /// Chunk, embed and store one document. Returns whether vectors were
    /// written. `lite` flips to true for the rest of the run when the
    /// provider becomes unreachable.
    async fn index_document(
        &self,
        doc: &Document,
        lite: &mut bool,
        stats: &mut IndexStats,
    ) -> Result<bool, ReindexError> {
        let chunks = chunk_document(doc, &self.params);
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .map(|c| ChunkRecord::from_chunk(doc, c))
            .collect();
        stats.chunks_written += records.len() as u64;

        if !*lite {
            let texts: Vec<String> = chunks.into_iter().map(|c| c.embed_text).collect();
            match self.embedder.embed_documents(&texts).await {
                Ok(Some(vectors)) => {
                    self.store
                        .bulk_upsert(&doc.path, &records, &vectors)
                        .await
                        .map_err(ReindexError::Store)?;
                    return Ok(true);
                }
                Ok(None) => {
                    warn!("embedding provider unavailable; continuing in lite mode");
                    stats
                        .warnings
                        .push("embedding provider unavailable; remaining documents indexed without vectors".into());
                    *lite = true;
                }
                Err(EmbedError::Rejected(reason)) => {
                    warn!("{} stored without vectors: {}", doc.path, reason);
                    stats
                        .warnings
                        .push(format!("{}: stored without vectors ({})", doc.path, reason));
                }
                Err(e) => return Err(ReindexError::Embedding(e)),
            }
        }

        stats.lite_mode = true;
        self.store
            .bulk_upsert_lite(&doc.path, &records)
            .await
            .map_err(ReindexError::Store)?;
        Ok(false)
    }
}

/// Run the index command: reconcile the vault and print a summary.
pub async fn run_index(
    config: &Config,
    full: bool,
    lite: bool,
    mode: ProgressMode,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config).await?);
    let embedder = if lite {
        Embedder::lite()
    } else {
        Embedder::resolve(&config.embedding).await?
    };
    let reindexer = Reindexer::new(config, store, embedder)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let reporter = mode.reporter();
    let stats = if lite {
        reindexer
            .reindex_lite(full, reporter.as_ref(), &cancel)
            .await?
    } else {
        reindexer.reindex(full, reporter.as_ref(), &cancel).await?
    };

    println!("index {}", config.vault.root.display());
    println!("  documents: {}", stats.documents);
    println!("  chunks: {}", stats.chunks);
    println!(
        "  changes: {} new, {} changed, {} unchanged, {} deleted",
        stats.changes.new, stats.changes.changed, stats.changes.unchanged, stats.changes.deleted
    );
    println!("  chunks written: {}", stats.chunks_written);
    if !stats.skipped.is_empty() {
        println!("  skipped: {}", stats.skipped.len());
        for s in &stats.skipped {
            println!("    {}: {}", s.path, s.reason);
        }
    }
    for w in &stats.warnings {
        println!("  warning: {}", w);
    }
    if stats.lite_mode {
        println!("  mode: lite (no embeddings)");
    }
    if stats.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
    Ok(())
}

/// Slash-normalized, vault-relative form of a user or watcher supplied path.
fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let trimmed = path.trim_start_matches("./").trim_matches('/');
    trimmed
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}
