//! Search backend abstraction.
//!
//! The [`SearchBackend`] trait is the boundary to the search engine that
//! stores, analyzes, and ranks documents. The pipeline never talks HTTP
//! directly: callers construct a backend and pass it in as
//! `Arc<dyn SearchBackend>`, owning its connection lifecycle.
//!
//! | Implementation | Use |
//! |--------|---------|
//! | [`elastic::ElasticBackend`] | Elasticsearch REST API via `reqwest` |
//! | [`memory::InMemoryBackend`] | Tests; supports fault injection |

pub mod elastic;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::BackendError;
use crate::models::{BulkOutcome, ClusterInfo, IndexStats, IndexedDocument, SearchResults};
use crate::schema::SchemaDefinition;
use crate::search::SearchRequest;

/// Operations the ingestion pipeline and search front-end need from a
/// search engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Version and cluster name; doubles as a connectivity check.
    async fn info(&self) -> Result<ClusterInfo, BackendError>;

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError>;

    /// Create an index from `schema`. Fails with
    /// [`BackendError::IndexExists`] if it is already there.
    async fn create_index(&self, index: &str, schema: &SchemaDefinition)
        -> Result<(), BackendError>;

    /// Fails with [`BackendError::IndexNotFound`] if there is nothing to delete.
    async fn delete_index(&self, index: &str) -> Result<(), BackendError>;

    /// Write a batch in one request.
    ///
    /// Returns one outcome per document, in batch order; a rejected
    /// document does not affect the others. `Err` means the request as a
    /// whole failed and no per-document outcome is known.
    async fn bulk_write(
        &self,
        index: &str,
        batch: &[(u64, IndexedDocument)],
    ) -> Result<Vec<BulkOutcome>, BackendError>;

    /// Make everything written so far visible to searches.
    async fn refresh_index(&self, index: &str) -> Result<(), BackendError>;

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResults, BackendError>;

    async fn stats(&self, index: &str) -> Result<IndexStats, BackendError>;
}

/// Build the Elasticsearch backend described by `config.backend`.
pub fn connect(config: &Config) -> anyhow::Result<Arc<dyn SearchBackend>> {
    let backend = elastic::ElasticBackend::new(&config.backend)?;
    Ok(Arc::new(backend))
}
