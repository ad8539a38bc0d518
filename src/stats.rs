//! Index statistics and health overview.
//!
//! Summarizes what is indexed: note and chunk counts, embedding coverage,
//! the model that produced the stored vectors, and a per-content-type
//! breakdown. Used by `vidx stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::store::{SqliteStore, Store};

/// Per-content-type breakdown of note and chunk counts.
struct TypeStats {
    content_type: String,
    note_count: i64,
    chunk_count: i64,
    embedded_count: i64,
    last_modified: Option<i64>,
}

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let counts = store.counts().await?;
    let meta = store.embedding_meta().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Vault Index — Stats");
    println!("===================");
    println!();
    println!("  Vault:       {}", config.vault.root.display());
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Notes:       {}", counts.notes);
    println!("  Chunks:      {}", counts.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        counts.embedded_chunks,
        counts.chunks,
        if counts.chunks > 0 {
            (counts.embedded_chunks * 100) / counts.chunks
        } else {
            0
        }
    );
    match meta {
        Some(m) => println!("  Model:       {}", m),
        None => println!("  Model:       none (lite mode)"),
    }

    let rows = sqlx::query(
        r#"
        SELECT
            content_type,
            COUNT(DISTINCT path) AS note_count,
            COUNT(*) AS chunk_count,
            COUNT(embedding) AS embedded_count,
            MAX(modified_at) AS last_modified
        FROM chunks
        GROUP BY content_type
        ORDER BY note_count DESC
        "#,
    )
    .fetch_all(store.pool())
    .await?;

    let type_stats: Vec<TypeStats> = rows
        .iter()
        .map(|row| TypeStats {
            content_type: row.get("content_type"),
            note_count: row.get("note_count"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
            last_modified: row.get("last_modified"),
        })
        .collect();

    if !type_stats.is_empty() {
        println!();
        println!("  By type:");
        println!(
            "  {:<12} {:>6} {:>8} {:>10}   {}",
            "TYPE", "NOTES", "CHUNKS", "EMBEDDED", "LAST MODIFIED"
        );
        println!("  {}", "-".repeat(60));

        for s in &type_stats {
            let modified = match s.last_modified {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<12} {:>6} {:>8} {:>10}   {}",
                s.content_type, s.note_count, s.chunk_count, s.embedded_count, modified
            );
        }
    }

    println!();

    store.pool().close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
