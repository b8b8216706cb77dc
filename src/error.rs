//! Error types for dump reading, backend calls, and ingestion.
//!
//! Only [`DumpError::SourceNotFound`] and [`SchemaError`] stop an ingestion
//! run. Unparseable payload lines, rejected documents, failed bulk
//! requests, a [`DumpError::Read`] part way through the dump, and a failed
//! final refresh are recorded in the
//! [`IngestionReport`](crate::batch::IngestionReport) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while streaming a dump file.
#[derive(Error, Debug)]
pub enum DumpError {
    /// The path does not resolve to a readable file.
    #[error("dump file not found: {}", path.display())]
    SourceNotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// Reading or decompressing failed mid-stream.
    #[error("failed to read dump at line {line}: {source}")]
    Read {
        /// 1-based physical line number where reading stopped.
        line: u64,
        #[source]
        source: std::io::Error,
    },

    /// A payload line is not a JSON object. Logged and skipped by the reader.
    #[error("invalid record at line {line}: {source}")]
    RecordParse {
        /// 1-based physical line number of the payload line.
        line: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by a [`SearchBackend`](crate::backend::SearchBackend).
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// The request never produced a response (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {reason}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Reason extracted from the error body.
        reason: String,
    },

    /// Index not found.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// Index already exists.
    #[error("index already exists: {0}")]
    IndexExists(String),

    /// The response body could not be decoded.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Index setup failed. Always fatal.
#[derive(Error, Debug)]
#[error("schema setup failed for index '{index}': {source}")]
pub struct SchemaError {
    /// Index being created or recreated.
    pub index: String,
    #[source]
    pub source: BackendError,
}

/// Fatal ingestion errors.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] DumpError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
