//! Vault enumeration.
//!
//! Walks the vault root, pruning skipped directory names at any depth, and
//! yields vault-relative, slash-normalized document paths that match the
//! include globs. The same filter decides which directories the watcher
//! subscribes to and which changed paths it forwards.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::VaultConfig;

/// Which files of the vault are documents.
#[derive(Debug, Clone)]
pub struct VaultFilter {
    root: PathBuf,
    include: GlobSet,
    skip_dirs: Vec<String>,
}

impl VaultFilter {
    pub fn new(config: &VaultConfig) -> Result<Self> {
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            skip_dirs: config.effective_skip_dirs(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True if any directory component of `rel_path` is a skipped name.
    pub fn in_skipped_dir(&self, rel_path: &str) -> bool {
        let mut parts: Vec<&str> = rel_path.split('/').collect();
        parts.pop();
        parts.iter().any(|p| self.is_skipped_name(p))
    }

    pub fn is_skipped_name(&self, name: &str) -> bool {
        self.skip_dirs.iter().any(|d| d == name)
    }

    /// Whether a vault-relative path is an indexable document path.
    pub fn is_document(&self, rel_path: &str) -> bool {
        !self.in_skipped_dir(rel_path) && self.include.is_match(rel_path)
    }

    /// Vault-relative, slash-normalized form of an absolute path under the root.
    pub fn relative(&self, path: &Path) -> Option<String> {
        relative_path(&self.root, path)
    }

    /// All document paths currently on disk, sorted.
    pub fn scan_documents(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            bail!("Vault root does not exist: {}", self.root.display());
        }

        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_type().is_dir() || !self.skip_entry(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("vault walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match self.relative(entry.path()) {
                Some(rel) if self.include.is_match(&rel) => paths.push(rel),
                Some(_) => {}
                None => tracing::warn!("skipping non-UTF-8 path: {}", entry.path().display()),
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Every directory that should be watched: the root plus all
    /// descendants whose path contains no skipped name.
    pub fn watch_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            bail!("Vault root does not exist: {}", self.root.display());
        }
        Ok(self.dirs_under(&self.root))
    }

    /// Non-skipped directories at or below `start`.
    pub fn dirs_under(&self, start: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = WalkDir::new(start)
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir() && (e.depth() == 0 || !self.skip_entry(e)))
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        dirs.sort();
        dirs
    }

    fn skip_entry(&self, entry: &walkdir::DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .map(|n| self.is_skipped_name(n))
            .unwrap_or(false)
    }
}

/// Vault-relative, slash-normalized path, or `None` if outside the root
/// or not valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
