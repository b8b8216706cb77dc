//! # Cirrus Indexer
//!
//! Loads a CirrusSearch dump (gzip, NDJSON in bulk-pair layout) into an
//! Elasticsearch index with Korean morphological analysis, and runs ranked
//! free-text queries against it.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌─────────────┐   ┌───────────────┐
//! │ DumpReader │──▶│ transform │──▶│ BatchSubmit │──▶│ SearchBackend │
//! │  gzip+json │   │ 9 fields  │   │ bulk, N wkr │   │ Elasticsearch │
//! └────────────┘   └───────────┘   └─────────────┘   └───────┬───────┘
//!                                                            │
//!                                  ┌──────────┐              │
//!                                  │  search  │◀─────────────┘
//!                                  │  (BM25)  │
//!                                  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cirrus status                                   # connection + index state
//! cirrus init                                     # create index with nori analyzer
//! cirrus ingest kowiki-content.json.gz --limit 10000
//! cirrus search "대한민국 수도"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error types |
//! | [`models`] | Records, documents, hits |
//! | [`dump`] | Streaming dump reader |
//! | [`transform`] | Record → document field normalization |
//! | [`schema`] | Analyzer, similarity, mappings; index lifecycle |
//! | [`backend`] | Search engine abstraction (Elasticsearch, in-memory) |
//! | [`batch`] | Bulk submission and the ingestion report |
//! | [`ingest`] | Pipeline orchestration |
//! | [`search`] | Ranked queries and sampling |
//! | [`stats`] | Index statistics and status |
//! | [`progress`] | Progress output on stderr |
//! | [`cancel`] | Cooperative cancellation |

pub mod backend;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod dump;
pub mod error;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod schema;
pub mod search;
pub mod stats;
pub mod transform;
