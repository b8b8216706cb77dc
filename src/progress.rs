//! Ingestion progress reporting.
//!
//! Reports how many documents have been submitted during `cirrus ingest`
//! so a multi-hour run is visibly alive. Progress goes to **stderr** so
//! stdout stays parseable for scripts; it is separate from `tracing` logs.

use std::io::Write;

/// How often (in submitted documents) the batch submitter reports.
pub const REPORT_EVERY: u64 = 1_000;

/// A single progress event for ingestion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestProgressEvent {
    /// Schema is settled; documents start flowing into `index`.
    Started { index: String },
    /// Running totals after a batch completes.
    Submitted {
        documents: u64,
        failed: u64,
        batches: u64,
    },
    /// Stream exhausted (or cancelled) and the index refreshed.
    Finished {
        success: u64,
        failed: u64,
        cancelled: bool,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress: "ingest kowiki_cirrus  12,000 documents (3 failed) in 24 batches".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Started { index } => format!("ingest {}  starting...\n", index),
            IngestProgressEvent::Submitted {
                documents,
                failed,
                batches,
            } => format!(
                "ingest  {} documents ({} failed) in {} batches\n",
                format_number(*documents),
                format_number(*failed),
                format_number(*batches)
            ),
            IngestProgressEvent::Finished {
                success,
                failed,
                cancelled,
            } => format!(
                "ingest  {}  {} indexed, {} failed\n",
                if *cancelled { "cancelled" } else { "done" },
                format_number(*success),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Started { index } => serde_json::json!({
                "event": "progress",
                "phase": "started",
                "index": index,
            }),
            IngestProgressEvent::Submitted {
                documents,
                failed,
                batches,
            } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "documents": documents,
                "failed": failed,
                "batches": batches,
            }),
            IngestProgressEvent::Finished {
                success,
                failed,
                cancelled,
            } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "success": success,
                "failed": failed,
                "cancelled": cancelled,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

/// Thousands separators: `1234567` → `1,234,567`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
