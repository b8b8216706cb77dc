//! Batched bulk submission with partial-failure accounting.
//!
//! [`BatchSubmitter`] groups documents into fixed-size batches in stream
//! order and writes each batch with one bulk request. A rejected document
//! is recorded and the rest of its batch still lands; a batch whose request
//! fails outright is recorded as one [`FailureCause::Transport`] entry and
//! submission moves on to the next batch.
//!
//! Up to `workers` batches may be in flight at once (a `JoinSet`). Ids are
//! fixed before dispatch and the report is only updated by the collecting
//! loop, so completion order never affects accounting.
//!
//! Documents arrive over a bounded `mpsc` channel. The producer (the dump
//! reader in [`ingest`](crate::ingest)) runs on a blocking thread, so gzip
//! decompression never stalls the async workers; when the submitter stops
//! early it closes the channel and the producer's next send fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::backend::SearchBackend;
use crate::cancel::CancelFlag;
use crate::error::BackendError;
use crate::models::{BulkOutcome, IndexedDocument};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, REPORT_EVERY};

/// Why a document did not make it into the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The backend refused this document.
    Rejected { id: u64, reason: String },
    /// The bulk request for a whole batch failed; every document in
    /// `first_id..=last_id` counts as failed.
    Transport {
        first_id: u64,
        last_id: u64,
        documents: u64,
        reason: String,
    },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Rejected { id, reason } => write!(f, "document {}: {}", id, reason),
            FailureCause::Transport {
                first_id,
                last_id,
                documents,
                reason,
            } => write!(
                f,
                "batch {}..{} ({} documents): {}",
                first_id, last_id, documents, reason
            ),
        }
    }
}

/// Final tally of an ingestion run.
///
/// `success_count + failure_count` equals the number of documents that
/// were handed to the submitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub success_count: u64,
    pub failure_count: u64,
    pub failures: Vec<FailureCause>,
    /// Payload lines the dump reader could not parse.
    pub skipped_lines: u64,
    /// Bulk requests issued.
    pub batches: u64,
    /// Stopped early at a batch boundary.
    pub cancelled: bool,
    /// The dump stopped yielding records part way through.
    pub source_error: Option<String>,
    /// The final refresh failed, so written documents may not be searchable.
    pub refresh_error: Option<String>,
}

impl IngestionReport {
    /// Documents accounted for, successful or not.
    pub fn processed(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// No read or refresh error cut the run short.
    pub fn is_complete(&self) -> bool {
        self.source_error.is_none() && self.refresh_error.is_none()
    }

    fn record_outcomes(&mut self, outcomes: Vec<BulkOutcome>) {
        for outcome in outcomes {
            match outcome.error {
                None => self.success_count += 1,
                Some(reason) => {
                    warn!(id = outcome.id, %reason, "document rejected");
                    self.failure_count += 1;
                    self.failures.push(FailureCause::Rejected {
                        id: outcome.id,
                        reason,
                    });
                }
            }
        }
    }

    fn record_transport(&mut self, span: BatchSpan, err: &BackendError) {
        warn!(
            first_id = span.first_id,
            last_id = span.last_id,
            documents = span.documents,
            error = %err,
            "bulk request failed"
        );
        self.failure_count += span.documents;
        self.failures.push(FailureCause::Transport {
            first_id: span.first_id,
            last_id: span.last_id,
            documents: span.documents,
            reason: err.to_string(),
        });
    }
}

/// Sending half of the document feed, paired with [`BatchSubmitter::submit_all`].
pub type DocumentSender = mpsc::Sender<(u64, IndexedDocument)>;

/// Receiving half of the document feed.
pub type DocumentReceiver = mpsc::Receiver<(u64, IndexedDocument)>;

/// First id of a batch plus the backend's answer.
type BatchResult = (u64, Result<Vec<BulkOutcome>, BackendError>);

/// Id range of a dispatched batch, kept by the collector.
#[derive(Debug, Clone, Copy)]
struct BatchSpan {
    first_id: u64,
    last_id: u64,
    documents: u64,
}

/// Submits documents to a backend in bulk batches.
pub struct BatchSubmitter {
    backend: Arc<dyn SearchBackend>,
    index: String,
    batch_size: usize,
    workers: usize,
    cancel: CancelFlag,
    progress: Arc<dyn IngestProgressReporter>,
}

impl BatchSubmitter {
    /// One worker, no cancellation source, no progress output.
    pub fn new(backend: Arc<dyn SearchBackend>, index: impl Into<String>, batch_size: usize) -> Self {
        Self {
            backend,
            index: index.into(),
            batch_size: batch_size.max(1),
            workers: 1,
            cancel: CancelFlag::new(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Allow up to `workers` bulk requests in flight.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
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

    /// Consume `documents` in order until the sender is dropped and submit
    /// them batch by batch.
    ///
    /// The cancel flag is checked before each new batch is dispatched;
    /// batches already in flight are always collected.
    pub async fn submit_all(&self, mut documents: DocumentReceiver) -> IngestionReport {
        let mut report = IngestionReport::default();
        let mut in_flight: JoinSet<BatchResult> = JoinSet::new();
        // Dispatched batches not yet collected, keyed by first id.
        let mut pending: BTreeMap<u64, BatchSpan> = BTreeMap::new();

        loop {
            while in_flight.len() >= self.workers {
                self.collect_next(&mut in_flight, &mut pending, &mut report)
                    .await;
            }

            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let batch = next_batch(&mut documents, self.batch_size).await;
            let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
                break;
            };
            let span = BatchSpan {
                first_id: first.0,
                last_id: last.0,
                documents: batch.len() as u64,
            };
            debug!(first_id = span.first_id, size = span.documents, "submitting batch");

            let backend = Arc::clone(&self.backend);
            let index = self.index.clone();
            pending.insert(span.first_id, span);
            in_flight.spawn(async move {
                let result = backend.bulk_write(&index, &batch).await;
                (span.first_id, result)
            });
            report.batches += 1;
        }
        documents.close();

        while !in_flight.is_empty() {
            self.collect_next(&mut in_flight, &mut pending, &mut report)
                .await;
        }

        // Only batches whose task panicked are left.
        let lost = BackendError::Transport("bulk task panicked".to_string());
        for span in pending.into_values() {
            report.record_transport(span, &lost);
        }

        report
    }

    async fn collect_next(
        &self,
        in_flight: &mut JoinSet<BatchResult>,
        pending: &mut BTreeMap<u64, BatchSpan>,
        report: &mut IngestionReport,
    ) {
        let before = report.processed();

        let (first_id, result) = match in_flight.join_next().await {
            Some(Ok(done)) => done,
            Some(Err(join_err)) => {
                error!(error = %join_err, "bulk task failed");
                return;
            }
            None => return,
        };

        let Some(span) = pending.remove(&first_id) else {
            return;
        };

        match result {
            Ok(outcomes) => report.record_outcomes(outcomes),
            Err(err) => report.record_transport(span, &err),
        }

        if report.processed() / REPORT_EVERY > before / REPORT_EVERY {
            self.progress.report(IngestProgressEvent::Submitted {
                documents: report.processed(),
                failed: report.failure_count,
                batches: report.batches,
            });
        }
    }
}

/// Up to `size` documents; fewer only once the feed is exhausted.
async fn next_batch(documents: &mut DocumentReceiver, size: usize) -> Vec<(u64, IndexedDocument)> {
    let mut batch = Vec::with_capacity(size);
    while batch.len() < size {
        match documents.recv().await {
            Some(document) => batch.push(document),
            None => break,
        }
    }
    batch
}
