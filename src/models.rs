//! Core data types that flow through ingestion and search.
//!
//! A [`RawRecord`] is decoded from one payload line of the dump, turned into
//! an [`IndexedDocument`] by [`transform`](crate::transform::transform), and
//! submitted to the backend under a sequential numeric id.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Untyped field map exactly as decoded from one dump payload line.
pub type RawRecord = Map<String, Value>;

/// Canonical document shape submitted to the index.
///
/// `title` and `text` are always present. Every other field is `Some` only
/// when the source record carried it, and `None` fields are omitted from
/// the serialized body. Pass-through fields keep the record's raw JSON
/// value whatever its type; the index mapping decides whether it fits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub title: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_text: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incoming_links: Option<Value>,
}

/// Outcome of one document inside a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome {
    pub id: u64,
    /// `None` when the document was accepted, otherwise the backend's cause.
    pub error: Option<String>,
}

impl BulkOutcome {
    pub fn accepted(id: u64) -> Self {
        Self { id, error: None }
    }

    pub fn rejected(id: u64, cause: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(cause.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub title: String,
    pub opening_text: Option<String>,
    pub timestamp: Option<String>,
    pub namespace: Option<i64>,
}

/// Ranked hits plus the total number of matching documents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// Document count and on-disk size of an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub doc_count: u64,
    pub size_bytes: u64,
}

/// Identity of the cluster behind the backend connection.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub version: String,
    pub cluster_name: String,
}
