//! Ingestion pipeline orchestration.
//!
//! Drives the full run: open dump → settle schema → stream records →
//! transform → batch submit → refresh. The dump is opened before any
//! backend call so a bad path never touches the index. Ids are the 1-based
//! position of each decoded record in the stream.
//!
//! Reading and transforming run on a `spawn_blocking` thread that feeds the
//! submitter through a bounded channel. Only a missing dump or a schema
//! failure aborts the run; a read error part way through or a failed final
//! refresh is recorded in the [`IngestionReport`] next to the counts.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::backend::{self, SearchBackend};
use crate::batch::{BatchSubmitter, DocumentSender, IngestionReport};
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::dump::{self, DumpRecords, GzLines};
use crate::error::{DumpError, IngestError, SchemaError};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, ProgressMode};
use crate::schema::{IndexDecision, SchemaManager, SchemaOutcome};
use crate::transform::transform;

/// Failure causes printed by `cirrus ingest`.
const MAX_PRINTED_FAILURES: usize = 10;

/// Batches the reader may run ahead of the submitter.
const READ_AHEAD_BATCHES: usize = 4;

/// Composes schema setup, dump streaming, transformation, and submission.
pub struct IngestionPipeline {
    backend: Arc<dyn SearchBackend>,
    schema: SchemaManager,
    decision: IndexDecision,
    workers: usize,
    cancel: CancelFlag,
    progress: Arc<dyn IngestProgressReporter>,
}

impl IngestionPipeline {
    pub fn new(backend: Arc<dyn SearchBackend>, index: impl Into<String>) -> Self {
        let schema = SchemaManager::new(Arc::clone(&backend), index);
        Self {
            backend,
            schema,
            decision: IndexDecision::Reuse,
            workers: 1,
            cancel: CancelFlag::new(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Whether `run_ingestion` keeps or recreates an existing index.
    pub fn with_decision(mut self, decision: IndexDecision) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn index(&self) -> &str {
        self.schema.index()
    }

    pub async fn ensure_schema(&self) -> Result<SchemaOutcome, SchemaError> {
        self.schema.ensure_schema().await
    }

    pub async fn drop_and_recreate(&self) -> Result<(), SchemaError> {
        self.schema.drop_and_recreate().await
    }

    /// Ingest up to `limit` records from the dump at `path`.
    ///
    /// Rejected documents, failed batches, a read error part way through
    /// the dump, and a failed final refresh all end up in the report; only
    /// a missing dump or a schema failure return `Err`.
    pub async fn run_ingestion(
        &self,
        path: &Path,
        limit: Option<usize>,
        batch_size: usize,
    ) -> Result<IngestionReport, IngestError> {
        let records = dump::stream(path, limit)?;

        let outcome = self.schema.ensure(self.decision).await?;
        let index = self.index().to_string();
        info!(index = %index, ?outcome, path = %path.display(), ?limit, batch_size, "ingestion started");
        self.progress
            .report(IngestProgressEvent::Started { index: index.clone() });

        let submitter = BatchSubmitter::new(Arc::clone(&self.backend), index.clone(), batch_size)
            .with_workers(self.workers)
            .with_cancel(self.cancel.clone())
            .with_progress(Arc::clone(&self.progress));

        let (tx, rx) = mpsc::channel(batch_size.max(1).saturating_mul(READ_AHEAD_BATCHES));
        let reader = tokio::task::spawn_blocking(move || feed_documents(records, tx));

        let mut report = submitter.submit_all(rx).await;
        match reader.await {
            Ok(summary) => {
                report.skipped_lines = summary.skipped;
                if let Some(e) = summary.error {
                    error!(error = %e, "dump reading stopped early");
                    report.source_error = Some(e.to_string());
                }
            }
            Err(join_err) => {
                error!(error = %join_err, "dump reader task failed");
                report.source_error = Some(format!("dump reader task failed: {}", join_err));
            }
        }

        // Whatever was written becomes searchable, even after cancel or a read error.
        match self.backend.refresh_index(&index).await {
            Ok(()) => info!(index = %index, "index refreshed"),
            Err(e) => {
                warn!(index = %index, error = %e, "refresh failed");
                report.refresh_error = Some(e.to_string());
            }
        }

        info!(
            index = %index,
            success = report.success_count,
            failed = report.failure_count,
            skipped = report.skipped_lines,
            batches = report.batches,
            cancelled = report.cancelled,
            complete = report.is_complete(),
            "ingestion finished"
        );
        self.progress.report(IngestProgressEvent::Finished {
            success: report.success_count,
            failed: report.failure_count,
            cancelled: report.cancelled,
        });

        Ok(report)
    }
}

/// Where the blocking reader stopped.
struct ReaderSummary {
    skipped: u64,
    error: Option<DumpError>,
}

/// Decode, transform, and number records until the dump ends, a read fails,
/// or the submitter hangs up.
fn feed_documents(mut records: DumpRecords<GzLines>, tx: DocumentSender) -> ReaderSummary {
    let mut error = None;
    let mut next_id = 1u64;

    for record in records.by_ref() {
        match record {
            Ok(raw) => {
                if tx.blocking_send((next_id, transform(&raw))).is_err() {
                    break;
                }
                next_id += 1;
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    ReaderSummary {
        skipped: records.skipped(),
        error,
    }
}

/// `cirrus ingest`: run the pipeline and print the report.
pub async fn run_ingest(
    config: &Config,
    dump_path: &Path,
    limit: Option<usize>,
    batch_size: Option<usize>,
    recreate: bool,
    progress: ProgressMode,
    cancel: CancelFlag,
) -> Result<()> {
    let backend = backend::connect(config)?;
    let batch_size = batch_size.unwrap_or(config.ingest.batch_size);
    if batch_size == 0 {
        anyhow::bail!("--batch-size must be > 0");
    }
    let decision = if recreate {
        IndexDecision::Recreate
    } else {
        IndexDecision::Reuse
    };

    let pipeline = IngestionPipeline::new(backend, config.backend.index.clone())
        .with_decision(decision)
        .with_workers(config.ingest.workers)
        .with_cancel(cancel)
        .with_progress(Arc::from(progress.reporter()));

    let report = pipeline.run_ingestion(dump_path, limit, batch_size).await?;

    println!("ingest {}", dump_path.display());
    println!("  index: {}", pipeline.index());
    println!("  success: {}", report.success_count);
    println!("  failed: {}", report.failure_count);
    println!("  skipped lines: {}", report.skipped_lines);
    println!("  batches: {}", report.batches);
    if report.cancelled {
        println!("  cancelled: stopped at a batch boundary");
    }
    if !report.failures.is_empty() {
        println!(
            "  failures (showing {} of {}):",
            report.failures.len().min(MAX_PRINTED_FAILURES),
            report.failures.len()
        );
        for cause in report.failures.iter().take(MAX_PRINTED_FAILURES) {
            println!("    - {}", cause);
        }
    }
    if let Some(ref e) = report.source_error {
        println!("  read error: {}", e);
    }
    if let Some(ref e) = report.refresh_error {
        println!("  refresh error: {}", e);
    }

    match (&report.source_error, &report.refresh_error) {
        (None, None) => {
            println!("ok");
            Ok(())
        }
        (Some(read), None) => anyhow::bail!("ingestion stopped early: {}", read),
        (None, Some(refresh)) => anyhow::bail!("final refresh failed: {}", refresh),
        (Some(read), Some(refresh)) => anyhow::bail!(
            "ingestion stopped early: {}; final refresh also failed: {}",
            read,
            refresh
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::batch::FailureCause;
    use crate::schema::index_has_data;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_dump(dir: &TempDir, name: &str, lines: &[String]) -> PathBuf {
        let path = dir.path().join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        for line in lines {
            writeln!(encoder, "{}", line).unwrap();
        }
        encoder.finish().unwrap();
        path
    }

    fn dump_lines(count: usize) -> Vec<String> {
        let mut lines = Vec::new();
        for i in 1..=count {
            lines.push(format!(r#"{{"index":{{"_id":"{}"}}}}"#, 1000 + i));
            lines.push(format!(
                r#"{{"title":"문서 {}","text":"본문 {}","namespace":0,"incoming_links":{}}}"#,
                i, i, i
            ));
        }
        lines
    }

    fn pipeline(backend: &Arc<InMemoryBackend>) -> IngestionPipeline {
        IngestionPipeline::new(backend.clone(), "wiki")
    }

    #[tokio::test]
    async fn ingests_every_record_with_positional_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(7));
        let backend = Arc::new(InMemoryBackend::new());

        let report = pipeline(&backend).run_ingestion(&path, None, 3).await.unwrap();

        assert_eq!(report.success_count, 7);
        assert_eq!(report.failure_count, 0);
        assert_eq!(report.batches, 3);
        assert_eq!(backend.create_calls(), 1);
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.document("wiki", 1).unwrap().title, "문서 1");
        assert_eq!(backend.document("wiki", 7).unwrap().incoming_links, Some(serde_json::json!(7)));
        assert!(index_has_data(backend.as_ref(), "wiki").await.unwrap());
    }

    #[tokio::test]
    async fn limit_caps_emitted_records() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(20));
        let backend = Arc::new(InMemoryBackend::new());

        let report = pipeline(&backend)
            .run_ingestion(&path, Some(5), 500)
            .await
            .unwrap();

        assert_eq!(report.processed(), 5);
        assert_eq!(backend.document_count("wiki"), 5);
    }

    #[tokio::test]
    async fn skipped_lines_do_not_consume_ids() {
        let dir = TempDir::new().unwrap();
        let mut lines = dump_lines(3);
        lines[3] = "{not json".to_string();
        let path = write_dump(&dir, "dump.json.gz", &lines);
        let backend = Arc::new(InMemoryBackend::new());

        let report = pipeline(&backend).run_ingestion(&path, None, 10).await.unwrap();

        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.success_count, 2);
        assert_eq!(backend.document("wiki", 2).unwrap().title, "문서 3");
        assert!(backend.document("wiki", 3).is_none());
    }

    #[tokio::test]
    async fn missing_dump_never_touches_backend() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_index("wiki", &Default::default())
            .await
            .unwrap();

        let err = pipeline(&backend)
            .with_decision(IndexDecision::Recreate)
            .run_ingestion(&dir.path().join("absent.json.gz"), None, 10)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            IngestError::Source(DumpError::SourceNotFound { .. })
        ));
        // Not dropped and recreated.
        assert_eq!(backend.create_calls(), 1);
    }

    #[tokio::test]
    async fn schema_failure_aborts_before_reading() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(2));
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_unavailable(true);

        let err = pipeline(&backend).run_ingestion(&path, None, 10).await.unwrap_err();

        assert!(matches!(err, IngestError::Schema(_)));
        assert!(backend.bulk_batches().is_empty());
    }

    #[tokio::test]
    async fn rejections_and_transport_failures_are_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(6));
        let backend = Arc::new(InMemoryBackend::new());
        backend.reject_id(1, "mapper_parsing_exception: bad");
        backend.fail_bulk_call(2);

        let report = pipeline(&backend).run_ingestion(&path, None, 2).await.unwrap();

        assert_eq!(report.success_count, 3);
        assert_eq!(report.failure_count, 3);
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0], FailureCause::Rejected { id: 1, .. }));
        assert!(matches!(
            report.failures[1],
            FailureCause::Transport {
                first_id: 5,
                last_id: 6,
                documents: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn recreate_replaces_existing_documents() {
        let dir = TempDir::new().unwrap();
        let first = write_dump(&dir, "first.json.gz", &dump_lines(4));
        let second = write_dump(&dir, "second.json.gz", &dump_lines(2));
        let backend = Arc::new(InMemoryBackend::new());

        pipeline(&backend).run_ingestion(&first, None, 10).await.unwrap();
        assert_eq!(backend.document_count("wiki"), 4);

        pipeline(&backend)
            .with_decision(IndexDecision::Recreate)
            .run_ingestion(&second, None, 10)
            .await
            .unwrap();
        assert_eq!(backend.document_count("wiki"), 2);
        assert_eq!(backend.create_calls(), 2);
    }

    /// Gzip fixture whose tail was cut off in transit.
    fn truncate_tail(path: &Path, bytes: usize) {
        let data = std::fs::read(path).unwrap();
        std::fs::write(path, &data[..data.len() - bytes]).unwrap();
    }

    #[tokio::test]
    async fn truncated_dump_still_yields_report() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(2_000));
        truncate_tail(&path, 200);
        let backend = Arc::new(InMemoryBackend::new());

        let report = pipeline(&backend).run_ingestion(&path, None, 100).await.unwrap();

        let cause = report.source_error.as_deref().unwrap();
        assert!(cause.starts_with("failed to read dump at line"), "{}", cause);
        assert!(report.refresh_error.is_none());
        assert!(!report.is_complete());
        assert!(report.success_count > 0);
        assert!(report.success_count < 2_000);
        assert_eq!(report.failure_count, 0);
        // Documents written before the error are refreshed and searchable.
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.document_count("wiki") as u64, report.success_count);
        assert!(index_has_data(backend.as_ref(), "wiki").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(3));
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_refresh_failing(true);

        let report = pipeline(&backend).run_ingestion(&path, None, 10).await.unwrap();

        assert_eq!(report.success_count, 3);
        assert!(report.source_error.is_none());
        assert_eq!(
            report.refresh_error.as_deref(),
            Some("backend returned 503: refresh rejected")
        );
    }

    #[tokio::test]
    async fn refresh_failure_does_not_hide_read_error() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(2_000));
        truncate_tail(&path, 200);
        let backend = Arc::new(InMemoryBackend::new());
        backend.set_refresh_failing(true);

        let report = pipeline(&backend).run_ingestion(&path, None, 100).await.unwrap();

        assert!(report.source_error.is_some());
        assert!(report.refresh_error.is_some());
        assert!(report.success_count > 0);
    }

    #[tokio::test]
    async fn cancelled_run_still_refreshes() {
        let dir = TempDir::new().unwrap();
        let path = write_dump(&dir, "dump.json.gz", &dump_lines(3));
        let backend = Arc::new(InMemoryBackend::new());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = pipeline(&backend)
            .with_cancel(cancel)
            .run_ingestion(&path, None, 10)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.processed(), 0);
        assert_eq!(backend.refresh_calls(), 1);
    }
}
