//! In-memory [`SearchBackend`] for tests.
//!
//! Indices live in a `HashMap` behind `std::sync::RwLock`. Search is a
//! naive substring match scored per field with the request's boosts, which
//! is enough to check ordering without a real analyzer. Failures can be
//! injected per document id, per bulk call, for refresh, or for the whole
//! backend.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use super::SearchBackend;
use crate::error::BackendError;
use crate::models::{
    BulkOutcome, ClusterInfo, IndexStats, IndexedDocument, SearchHit, SearchResults,
};
use crate::schema::SchemaDefinition;
use crate::search::{SearchQuery, SearchRequest};

struct StoredIndex {
    schema: SchemaDefinition,
    /// Written documents, not yet searchable until refresh.
    pending: BTreeMap<u64, IndexedDocument>,
    /// Searchable documents.
    visible: BTreeMap<u64, IndexedDocument>,
}

impl StoredIndex {
    fn doc_count(&self) -> usize {
        let mut ids: HashSet<u64> = self.visible.keys().copied().collect();
        ids.extend(self.pending.keys().copied());
        ids.len()
    }
}

/// In-memory backend with fault injection.
pub struct InMemoryBackend {
    indices: RwLock<HashMap<String, StoredIndex>>,
    rejected_ids: RwLock<HashMap<u64, String>>,
    /// Zero-based bulk call numbers that fail with a transport error.
    failing_bulk_calls: RwLock<HashSet<usize>>,
    bulk_calls: AtomicUsize,
    create_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    unavailable: AtomicBool,
    refresh_failing: AtomicBool,
    bulk_batches: RwLock<Vec<Vec<u64>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            rejected_ids: RwLock::new(HashMap::new()),
            failing_bulk_calls: RwLock::new(HashSet::new()),
            bulk_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            refresh_failing: AtomicBool::new(false),
            bulk_batches: RwLock::new(Vec::new()),
        }
    }

    /// Reject the document with this id in any bulk write.
    pub fn reject_id(&self, id: u64, reason: &str) {
        self.rejected_ids
            .write()
            .unwrap()
            .insert(id, reason.to_string());
    }

    /// Fail the `call`-th bulk request (zero-based) at the transport level.
    pub fn fail_bulk_call(&self, call: usize) {
        self.failing_bulk_calls.write().unwrap().insert(call);
    }

    /// Make every call fail as if the cluster were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `refresh_index` fail while every other call still works.
    pub fn set_refresh_failing(&self, failing: bool) {
        self.refresh_failing.store(failing, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Ids of every bulk request received, in arrival order.
    pub fn bulk_batches(&self) -> Vec<Vec<u64>> {
        self.bulk_batches.read().unwrap().clone()
    }

    /// Documents stored in `index`, searchable or not.
    pub fn document_count(&self, index: &str) -> usize {
        self.indices
            .read()
            .unwrap()
            .get(index)
            .map(StoredIndex::doc_count)
            .unwrap_or(0)
    }

    pub fn document(&self, index: &str, id: u64) -> Option<IndexedDocument> {
        let indices = self.indices.read().unwrap();
        let stored = indices.get(index)?;
        stored
            .pending
            .get(&id)
            .or_else(|| stored.visible.get(&id))
            .cloned()
    }

    pub fn schema_of(&self, index: &str) -> Option<SchemaDefinition> {
        self.indices
            .read()
            .unwrap()
            .get(index)
            .map(|s| s.schema.clone())
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn field_text<'a>(doc: &'a IndexedDocument, field: &str) -> &'a str {
    match field {
        "title" => &doc.title,
        "text" => &doc.text,
        "opening_text" => doc
            .opening_text
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default(),
        _ => "",
    }
}

/// `best_fields` scoring: the best single boosted field wins.
fn score(doc: &IndexedDocument, query: &str, fields: &[crate::search::FieldBoost]) -> f64 {
    let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    fields
        .iter()
        .map(|fb| {
            let text = field_text(doc, &fb.field).to_lowercase();
            let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
            matched as f64 * f64::from(fb.boost)
        })
        .fold(0.0, f64::max)
}

fn to_hit(id: u64, doc: &IndexedDocument, score: f64) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        score,
        title: doc.title.clone(),
        opening_text: doc
            .opening_text
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string),
        timestamp: doc.timestamp.as_ref().and_then(Value::as_str).map(str::to_string),
        namespace: doc.namespace.as_ref().and_then(Value::as_i64),
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn info(&self) -> Result<ClusterInfo, BackendError> {
        self.check_available()?;
        Ok(ClusterInfo {
            version: "in-memory".to_string(),
            cluster_name: "memory".to_string(),
        })
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        self.check_available()?;
        Ok(self.indices.read().unwrap().contains_key(index))
    }

    async fn create_index(
        &self,
        index: &str,
        schema: &SchemaDefinition,
    ) -> Result<(), BackendError> {
        self.check_available()?;
        let mut indices = self.indices.write().unwrap();
        if indices.contains_key(index) {
            return Err(BackendError::IndexExists(index.to_string()));
        }
        indices.insert(
            index.to_string(),
            StoredIndex {
                schema: schema.clone(),
                pending: BTreeMap::new(),
                visible: BTreeMap::new(),
            },
        );
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        self.check_available()?;
        match self.indices.write().unwrap().remove(index) {
            Some(_) => Ok(()),
            None => Err(BackendError::IndexNotFound(index.to_string())),
        }
    }

    async fn bulk_write(
        &self,
        index: &str,
        batch: &[(u64, IndexedDocument)],
    ) -> Result<Vec<BulkOutcome>, BackendError> {
        self.check_available()?;
        let call = self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        self.bulk_batches
            .write()
            .unwrap()
            .push(batch.iter().map(|(id, _)| *id).collect());

        if self.failing_bulk_calls.read().unwrap().contains(&call) {
            return Err(BackendError::Transport(format!(
                "bulk request {} timed out",
                call
            )));
        }

        let rejected = self.rejected_ids.read().unwrap();
        let mut indices = self.indices.write().unwrap();
        // Bulk indexing into a missing index auto-creates it, as Elasticsearch does.
        let stored = indices
            .entry(index.to_string())
            .or_insert_with(|| StoredIndex {
                schema: SchemaDefinition::default(),
                pending: BTreeMap::new(),
                visible: BTreeMap::new(),
            });

        let outcomes = batch
            .iter()
            .map(|(id, doc)| match rejected.get(id) {
                Some(reason) => BulkOutcome::rejected(*id, reason.clone()),
                None => {
                    stored.pending.insert(*id, doc.clone());
                    BulkOutcome::accepted(*id)
                }
            })
            .collect();
        Ok(outcomes)
    }

    async fn refresh_index(&self, index: &str) -> Result<(), BackendError> {
        self.check_available()?;
        if self.refresh_failing.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                reason: "refresh rejected".to_string(),
            });
        }
        let mut indices = self.indices.write().unwrap();
        let stored = indices
            .get_mut(index)
            .ok_or_else(|| BackendError::IndexNotFound(index.to_string()))?;
        let pending = std::mem::take(&mut stored.pending);
        stored.visible.extend(pending);
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResults, BackendError> {
        self.check_available()?;
        let indices = self.indices.read().unwrap();
        let stored = indices
            .get(index)
            .ok_or_else(|| BackendError::IndexNotFound(index.to_string()))?;

        let mut hits: Vec<SearchHit> = match &request.query {
            SearchQuery::MatchAll => stored
                .visible
                .iter()
                .map(|(id, doc)| to_hit(*id, doc, 1.0))
                .collect(),
            SearchQuery::MultiMatch { query, fields } => stored
                .visible
                .iter()
                .filter_map(|(id, doc)| {
                    let s = score(doc, query, fields);
                    (s > 0.0).then(|| to_hit(*id, doc, s))
                })
                .collect(),
        };

        // BTreeMap iteration already orders ties by id.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total = hits.len() as u64;
        hits.truncate(request.size);
        Ok(SearchResults { total, hits })
    }

    async fn stats(&self, index: &str) -> Result<IndexStats, BackendError> {
        self.check_available()?;
        let indices = self.indices.read().unwrap();
        let stored = indices
            .get(index)
            .ok_or_else(|| BackendError::IndexNotFound(index.to_string()))?;

        let size_bytes = stored
            .visible
            .values()
            .chain(stored.pending.values())
            .map(|doc| serde_json::to_vec(doc).map(|v| v.len() as u64).unwrap_or(0))
            .sum();

        Ok(IndexStats {
            doc_count: stored.doc_count() as u64,
            size_bytes,
        })
    }
}
