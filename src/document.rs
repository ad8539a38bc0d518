//! Document loading: decoding, front matter, and classification.
//!
//! A vault file becomes a [`Document`] in two steps: [`load_document`] reads
//! bytes and decodes them as UTF-8, then [`parse_document`] extracts the
//! optional front matter block and derives title, tags, confidence and
//! content type. Parsing is pure and does no I/O.
//!
//! Front matter is YAML, parsed with `gray_matter`. Recognized keys:
//!
//! ```text
//! ---
//! title: Release checklist
//! tags: [ops, release]      # any YAML sequence, or a single string
//! confidence: 0.8           # clamped to [0, 1]
//! type: log                 # marks a log entry
//! ---
//! ```

use gray_matter::engine::YAML;
use gray_matter::Matter;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::change::content_hash;
use crate::models::{ContentType, Document};

/// Why a document could not be loaded.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file is gone; callers treat this as a deletion.
    #[error("file no longer exists")]
    Missing,
    #[error("unreadable: {0}")]
    Unreadable(#[source] std::io::Error),
    #[error("not valid UTF-8 text")]
    NotText,
}

/// Read and parse the document at `root/rel_path`.
pub fn load_document(
    root: &Path,
    rel_path: &str,
    log_prefixes: &[String],
) -> Result<Document, DocumentError> {
    let full = root.join(rel_path);
    let bytes = std::fs::read(&full).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DocumentError::Missing,
        _ => DocumentError::Unreadable(e),
    })?;
    let raw = String::from_utf8(bytes).map_err(|_| DocumentError::NotText)?;

    let modified_at = std::fs::metadata(&full)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(parse_document(rel_path, &raw, modified_at, log_prefixes))
}

/// Build a [`Document`] from raw file text.
pub fn parse_document(
    rel_path: &str,
    raw: &str,
    modified_at: i64,
    log_prefixes: &[String],
) -> Document {
    let (front, body) = split_front_matter(raw);
    let meta = match front {
        Some(_) => parse_front_matter(rel_path, raw),
        None => FrontMatter::default(),
    };

    let content_type = if meta.is_log() || log_prefixes.iter().any(|p| rel_path.starts_with(p.as_str()))
    {
        ContentType::Log
    } else {
        ContentType::Note
    };

    let tags = meta.tags();
    let title = meta
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| first_h1(body))
        .unwrap_or_else(|| file_stem(rel_path));

    let confidence = meta
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or_else(|| content_type.default_confidence());

    Document {
        path: rel_path.to_string(),
        title,
        tags,
        text: body.to_string(),
        modified_at,
        content_hash: content_hash(raw),
        content_type,
        confidence,
    }
}

/// Recognized front matter keys. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FrontMatter {
    title: Option<String>,
    tags: Option<Tags>,
    confidence: Option<f64>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl FrontMatter {
    fn is_log(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.trim().eq_ignore_ascii_case("log"))
    }

    /// Tags with any leading `#` removed, de-duplicated in order.
    fn tags(&self) -> Vec<String> {
        let raw: Vec<&str> = match &self.tags {
            Some(Tags::One(tag)) => vec![tag.as_str()],
            Some(Tags::Many(tags)) => tags.iter().map(String::as_str).collect(),
            None => Vec::new(),
        };
        let mut tags: Vec<String> = Vec::new();
        for tag in raw {
            let tag = tag.trim().trim_start_matches('#');
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Tags {
    One(String),
    Many(Vec<String>),
}

/// Parse the YAML front matter of `raw`. Malformed YAML, or values of the
/// wrong type, leave the document without metadata.
fn parse_front_matter(rel_path: &str, raw: &str) -> FrontMatter {
    let matter = Matter::<YAML>::new();
    match matter.parse::<FrontMatter>(raw) {
        Ok(parsed) => parsed.data.unwrap_or_default(),
        Err(e) => {
            warn!("ignoring front matter of {}: {}", rel_path, e);
            FrontMatter::default()
        }
    }
}

/// Split off a leading `---` fenced block. Returns `(front, body)`; an
/// unterminated block is body text.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    {
        Some(r) => r,
        None => return (None, raw),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }
    (None, raw)
}

fn first_h1(body: &str) -> Option<String> {
    body.lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn file_stem(rel_path: &str) -> String {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name.to_string(),
    }
}
