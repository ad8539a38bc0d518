//! Filesystem watcher feeding incremental reindexes.
//!
//! Every directory of the vault that is not under a skipped name gets its
//! own non-recursive watch, so skipped trees (`.git`, the data directory,
//! private folders) never generate events. Directories created later are
//! watched as they appear.
//!
//! Changed paths collect in a set shared with the notify callback, so
//! repeated events for one path coalesce. Once no new event has arrived
//! for the debounce interval, the batch goes to
//! [`Reindexer::reindex_paths`]. Events that arrive during a reindex wait
//! for the next batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::progress::{NoProgress, ProgressReporter};
use crate::reindex::Reindexer;
use crate::store::{SqliteStore, Store};
use crate::vault::VaultFilter;

/// Paths produced by the notify callback, drained by the feeder loop.
type PendingPaths = Arc<Mutex<HashSet<PathBuf>>>;

/// Turns filesystem events into reindex batches.
pub struct WatchFeeder {
    vault: VaultFilter,
    debounce: Duration,
}

impl WatchFeeder {
    pub fn new(vault: VaultFilter, debounce: Duration) -> Self {
        Self { vault, debounce }
    }

    /// The directories to watch: the vault root and every descendant
    /// directory not under a skipped name.
    pub fn enumerate(&self) -> Result<Vec<PathBuf>> {
        self.vault.watch_dirs()
    }

    /// Watch until `cancel` fires, reindexing each debounced batch.
    pub async fn run(
        &self,
        reindexer: &Reindexer,
        progress: &dyn ProgressReporter,
        cancel: CancellationToken,
    ) -> Result<()> {
        let pending: PendingPaths = Arc::new(Mutex::new(HashSet::new()));
        let wake = Arc::new(Notify::new());

        let mut watcher = {
            let pending = pending.clone();
            let wake = wake.clone();
            RecommendedWatcher::new(
                move |res: notify::Result<Event>| match res {
                    Ok(event) => {
                        if !should_reindex(&event) {
                            return;
                        }
                        if let Ok(mut set) = pending.lock() {
                            set.extend(event.paths);
                        }
                        wake.notify_one();
                    }
                    Err(e) => warn!("watch error: {}", e),
                },
                NotifyConfig::default(),
            )?
        };

        let mut watched: HashSet<PathBuf> = HashSet::new();
        for dir in self.enumerate()? {
            add_watch(&mut watcher, &dir, &mut watched);
        }
        info!(
            "watching {} directories under {} (debounce {} ms)",
            watched.len(),
            self.vault.root().display(),
            self.debounce.as_millis()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wake.notified() => {}
            }

            // Wait until the vault has been quiet for the debounce interval.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.debounce) => break,
                    _ = wake.notified() => continue,
                }
            }

            let raw: Vec<PathBuf> = match pending.lock() {
                Ok(mut set) => set.drain().collect(),
                Err(_) => break,
            };
            let batch = self.plan_changes(raw, &mut watched);
            for dir in &batch.new_dirs {
                add_watch(&mut watcher, dir, &mut watched);
            }
            if batch.paths.is_empty() {
                continue;
            }

            info!("{} path(s) changed, reindexing", batch.paths.len());
            match reindexer.reindex_paths(&batch.paths, progress, &cancel).await {
                Ok(stats) => info!(
                    "reindexed: {} new, {} changed, {} deleted; index holds {} documents, {} chunks",
                    stats.changes.new,
                    stats.changes.changed,
                    stats.changes.deleted,
                    stats.documents,
                    stats.chunks
                ),
                Err(e) => error!("reindex failed: {}", e),
            }
        }

        Ok(())
    }

    /// Resolve raw event paths into vault-relative reindex targets.
    ///
    /// New directories are reported in [`ChangeBatch::new_dirs`] and their
    /// documents are included, since files inside them may predate the
    /// watch. Paths that no longer exist are included when they were
    /// documents or watched directories, so the reindexer deletes them.
    pub fn plan_changes(&self, raw: Vec<PathBuf>, watched: &mut HashSet<PathBuf>) -> ChangeBatch {
        let mut paths: HashSet<String> = HashSet::new();
        let mut new_dirs = Vec::new();

        for path in raw {
            let rel = match self.vault.relative(&path) {
                Some(r) => r,
                None => continue,
            };
            let name = rel.rsplit('/').next().unwrap_or(&rel);
            if self.vault.in_skipped_dir(&rel) || self.vault.is_skipped_name(name) {
                continue;
            }

            if path.is_dir() {
                if watched.contains(&path) {
                    continue;
                }
                for dir in self.vault.dirs_under(&path) {
                    if watched.contains(&dir) || new_dirs.contains(&dir) {
                        continue;
                    }
                    paths.extend(self.documents_in(&dir));
                    new_dirs.push(dir);
                }
            } else if path.exists() {
                if self.vault.is_document(&rel) {
                    paths.insert(rel);
                }
            } else if watched.remove(&path) || self.vault.is_document(&rel) {
                debug!("gone: {}", rel);
                paths.insert(rel);
            }
        }

        let mut paths: Vec<String> = paths.into_iter().collect();
        paths.sort();
        ChangeBatch { paths, new_dirs }
    }

    fn documents_in(&self, dir: &Path) -> Vec<String> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("cannot list {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter_map(|p| self.vault.relative(&p))
            .filter(|rel| self.vault.is_document(rel))
            .collect()
    }
}

/// Run the watch command: bring the index up to date, then follow changes
/// until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(config).await?);
    let embedder = Embedder::resolve(&config.embedding).await?;
    let reindexer = Reindexer::new(config, store, embedder)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let progress = NoProgress;
    let stats = reindexer.reindex(false, &progress, &cancel).await?;
    println!(
        "indexed {} documents, {} chunks; watching {}",
        stats.documents,
        stats.chunks,
        config.vault.root.display()
    );

    let feeder = WatchFeeder::new(
        reindexer.vault().clone(),
        Duration::from_millis(config.watch.debounce_ms),
    );
    feeder.run(&reindexer, &progress, cancel).await?;
    println!("stopped");
    Ok(())
}

/// Result of [`WatchFeeder::plan_changes`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Vault-relative paths to hand to the reindexer, sorted.
    pub paths: Vec<String>,
    /// Directories that need a watch.
    pub new_dirs: Vec<PathBuf>,
}

fn add_watch(watcher: &mut RecommendedWatcher, dir: &Path, watched: &mut HashSet<PathBuf>) {
    match watcher.watch(dir, RecursiveMode::NonRecursive) {
        Ok(()) => {
            watched.insert(dir.to_path_buf());
        }
        Err(e) => warn!("cannot watch {}: {}", dir.display(), e),
    }
}

/// Check if event should trigger reindex
fn should_reindex(event: &Event) -> bool {
    use notify::EventKind::*;
    matches!(event.kind, Create(_) | Modify(_) | Remove(_))
}
