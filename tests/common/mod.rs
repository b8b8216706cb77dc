//! A small fake Elasticsearch server for integration tests.
//!
//! Implements just enough of the REST API for `ElasticBackend`: cluster
//! info, index create/exists/delete, `_bulk`, `_refresh`, `_search`, and
//! `_stats`. Written documents only become searchable after `_refresh`.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct FakeIndex {
    body: Value,
    pending: BTreeMap<String, Value>,
    visible: BTreeMap<String, Value>,
}

#[derive(Default)]
struct FakeState {
    indices: HashMap<String, FakeIndex>,
    rejected_ids: HashSet<String>,
    bulk_status: Option<u16>,
    bulk_requests: usize,
    create_status: Option<u16>,
    create_requests: usize,
    last_authorization: Option<String>,
}

type Shared = Arc<Mutex<FakeState>>;

/// Handle to a running fake server.
pub struct FakeElastic {
    pub addr: SocketAddr,
    state: Shared,
}

impl FakeElastic {
    /// Bind to a random local port and serve in the background.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new()
            .route("/", get(cluster_info))
            .route("/_bulk", post(bulk))
            .route(
                "/{index}",
                head(index_exists).put(create_index).delete(delete_index),
            )
            .route("/{index}/_refresh", post(refresh))
            .route("/{index}/_search", post(search))
            .route("/{index}/_stats", get(stats))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Reject the document with this `_id` in any bulk request.
    pub fn reject_id(&self, id: &str) {
        self.state.lock().unwrap().rejected_ids.insert(id.to_string());
    }

    /// Answer every `_bulk` request with this status.
    pub fn fail_bulk_with(&self, status: u16) {
        self.state.lock().unwrap().bulk_status = Some(status);
    }

    /// Answer every index creation `PUT` with this status.
    pub fn fail_create_with(&self, status: u16) {
        self.state.lock().unwrap().create_status = Some(status);
    }

    pub fn create_requests(&self) -> usize {
        self.state.lock().unwrap().create_requests
    }

    pub fn bulk_requests(&self) -> usize {
        self.state.lock().unwrap().bulk_requests
    }

    pub fn index_body(&self, index: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .indices
            .get(index)
            .map(|i| i.body.clone())
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        let idx = state.indices.get(index)?;
        idx.pending.get(id).or_else(|| idx.visible.get(id)).cloned()
    }

    pub fn visible_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .indices
            .get(index)
            .map(|i| i.visible.len())
            .unwrap_or(0)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state.lock().unwrap().last_authorization.clone()
    }
}

fn not_found(index: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": { "type": "index_not_found_exception", "reason": format!("no such index [{}]", index) },
            "status": 404
        })),
    )
}

async fn cluster_info(State(state): State<Shared>, headers: HeaderMap) -> Json<Value> {
    state.lock().unwrap().last_authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(json!({
        "name": "fake-node",
        "cluster_name": "fake-cluster",
        "version": { "number": "8.15.0" },
        "tagline": "You Know, for Search"
    }))
}

async fn index_exists(State(state): State<Shared>, Path(index): Path<String>) -> StatusCode {
    if state.lock().unwrap().indices.contains_key(&index) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.create_requests += 1;

    if let Some(status) = state.create_status {
        let code = StatusCode::from_u16(status).unwrap();
        return (
            code,
            Json(json!({ "error": { "type": "fake_failure", "reason": "create disabled" } })),
        );
    }

    if state.indices.contains_key(&index) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "type": "resource_already_exists_exception",
                    "reason": format!("index [{}] already exists", index)
                },
                "status": 400
            })),
        );
    }
    state.indices.insert(
        index.clone(),
        FakeIndex {
            body,
            ..Default::default()
        },
    );
    (
        StatusCode::OK,
        Json(json!({ "acknowledged": true, "index": index })),
    )
}

async fn delete_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
) -> (StatusCode, Json<Value>) {
    match state.lock().unwrap().indices.remove(&index) {
        Some(_) => (StatusCode::OK, Json(json!({ "acknowledged": true }))),
        None => not_found(&index),
    }
}

async fn bulk(State(state): State<Shared>, body: Bytes) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    state.bulk_requests += 1;

    if let Some(status) = state.bulk_status {
        let code = StatusCode::from_u16(status).unwrap();
        return (
            code,
            Json(json!({ "error": { "type": "fake_failure", "reason": "bulk disabled" } })),
        );
    }

    let text = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
    let mut items = Vec::new();
    let mut errors = false;

    for pair in lines.chunks(2) {
        let action: Value = serde_json::from_str(pair[0]).unwrap();
        let source: Value = serde_json::from_str(pair[1]).unwrap();
        let index = action["index"]["_index"].as_str().unwrap().to_string();
        let id = action["index"]["_id"].as_str().unwrap().to_string();

        if state.rejected_ids.contains(&id) {
            errors = true;
            items.push(json!({ "index": {
                "_index": index, "_id": id, "status": 400,
                "error": { "type": "document_parsing_exception", "reason": "rejected by test" }
            }}));
            continue;
        }

        state
            .indices
            .entry(index.clone())
            .or_default()
            .pending
            .insert(id.clone(), source);
        items.push(json!({ "index": {
            "_index": index, "_id": id, "status": 201, "result": "created"
        }}));
    }

    (
        StatusCode::OK,
        Json(json!({ "took": 1, "errors": errors, "items": items })),
    )
}

async fn refresh(
    State(state): State<Shared>,
    Path(index): Path<String>,
) -> (StatusCode, Json<Value>) {
    let mut state = state.lock().unwrap();
    let Some(idx) = state.indices.get_mut(&index) else {
        return not_found(&index);
    };
    let pending = std::mem::take(&mut idx.pending);
    idx.visible.extend(pending);
    (StatusCode::OK, Json(json!({ "_shards": { "failed": 0 } })))
}

async fn search(
    State(state): State<Shared>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let state = state.lock().unwrap();
    let Some(idx) = state.indices.get(&index) else {
        return not_found(&index);
    };

    let size = body["size"].as_u64().unwrap_or(10) as usize;
    let query = body["query"]["multi_match"]["query"].as_str();

    let mut hits: Vec<(f64, &String, &Value)> = idx
        .visible
        .iter()
        .filter_map(|(id, doc)| match query {
            None => Some((1.0, id, doc)),
            Some(q) => {
                let title = doc["title"].as_str().unwrap_or_default();
                let text = doc["text"].as_str().unwrap_or_default();
                if title.contains(q) {
                    Some((3.0, id, doc))
                } else if text.contains(q) {
                    Some((1.0, id, doc))
                } else {
                    None
                }
            }
        })
        .collect();
    hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let total = hits.len();
    let hits: Vec<Value> = hits
        .into_iter()
        .take(size)
        .map(|(score, id, doc)| {
            json!({ "_index": index, "_id": id, "_score": score, "_source": doc })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "hits": { "total": { "value": total, "relation": "eq" }, "max_score": null, "hits": hits }
        })),
    )
}

async fn stats(
    State(state): State<Shared>,
    Path(index): Path<String>,
) -> (StatusCode, Json<Value>) {
    let state = state.lock().unwrap();
    let Some(idx) = state.indices.get(&index) else {
        return not_found(&index);
    };
    let count = idx.visible.len();
    let size: usize = idx.visible.values().map(|d| d.to_string().len()).sum();
    (
        StatusCode::OK,
        Json(json!({
            "indices": { index: { "total": {
                "docs": { "count": count, "deleted": 0 },
                "store": { "size_in_bytes": size }
            } } }
        })),
    )
}
