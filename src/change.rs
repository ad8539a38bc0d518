//! Content-hash change detection.
//!
//! Decides per document whether it must be (re)indexed. The fingerprint is
//! a SHA-256 over the raw file text; modification times are never consulted
//! because copy and sync tools rewrite them freely.
//!
//! A full scan takes a [`HashSnapshot`] of the store (path → hash) before
//! enumerating the vault and compares it against what is on disk with
//! [`plan_full_scan`]. Single-path reindexing uses [`classify`] directly.

use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

/// Path → content hash, as recorded in the store.
pub type HashSnapshot = HashMap<String, String>;

/// Outcome of comparing a document against the stored index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Changed,
    Unchanged,
    Deleted,
}

impl ChangeKind {
    /// Whether chunks must be regenerated.
    pub fn needs_indexing(&self) -> bool {
        matches!(self, ChangeKind::New | ChangeKind::Changed)
    }
}

/// SHA-256 of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Classify a document that exists on disk against its previous hash.
pub fn classify(current_hash: &str, previous_hash: Option<&str>) -> ChangeKind {
    match previous_hash {
        None => ChangeKind::New,
        Some(prev) if prev == current_hash => ChangeKind::Unchanged,
        Some(_) => ChangeKind::Changed,
    }
}

/// The work a full scan has to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanPlan {
    /// Paths present on disk, in enumeration order. Each still has to be
    /// loaded and classified by hash.
    pub present: Vec<String>,
    /// Previously indexed paths no longer on disk, sorted.
    pub deleted: Vec<String>,
}

/// Compare a store snapshot with the current file enumeration.
pub fn plan_full_scan(snapshot: &HashSnapshot, on_disk: &[String]) -> ScanPlan {
    let present: BTreeSet<&str> = on_disk.iter().map(String::as_str).collect();
    let mut deleted: Vec<String> = snapshot
        .keys()
        .filter(|p| !present.contains(p.as_str()))
        .cloned()
        .collect();
    deleted.sort();

    ScanPlan {
        present: on_disk.to_vec(),
        deleted,
    }
}
