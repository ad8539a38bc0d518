//! Reindex progress reporting.
//!
//! The reindexer emits one [`IndexProgress`] per processed document to a
//! [`ProgressReporter`]. Reporting is purely observational; an empty vault
//! produces no events at all.
//!
//! Terminal reporters write to **stderr** so stdout remains parseable for
//! scripts. [`ChannelProgress`] turns events into a stream the caller
//! consumes at its own pace.

use std::io::Write;

use serde::Serialize;
use tokio::sync::mpsc;

/// Progress after one document has been handled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexProgress {
    /// 1-based position of this document in the run.
    pub current: u64,
    pub total: u64,
    pub path: String,
}

/// Receives progress events. Called from the reindex loop.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &IndexProgress);
}

/// Human-friendly progress on stderr: "index  1,234 / 5,000  notes/a.md".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IndexProgress) {
        let line = format!(
            "index  {} / {}  {}\n",
            format_number(event.current),
            format_number(event.total),
            event.path
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IndexProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "current": event.current,
            "total": event.total,
            "path": event.path,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &IndexProgress) {}
}

/// Forwards events into an unbounded channel.
///
/// A closed receiver is ignored; the reindex never blocks on its observer.
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<IndexProgress>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IndexProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: &IndexProgress) {
        let _ = self.tx.send(event.clone());
    }
}

/// Adapts a closure `(current, total, path)` into a reporter.
pub struct FnProgress<F>(pub F);

impl<F> ProgressReporter for FnProgress<F>
where
    F: Fn(u64, u64, &str) + Send + Sync,
{
    fn report(&self, event: &IndexProgress) {
        (self.0)(event.current, event.total, &event.path)
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
