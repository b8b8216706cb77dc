//! Elasticsearch REST implementation of [`SearchBackend`].
//!
//! Talks to the cluster with an async `reqwest` client. Transient failures
//! (network errors, HTTP 429, 5xx) of data and query calls are retried with
//! exponential backoff; other 4xx responses fail immediately. Index
//! lifecycle calls (`index_exists`, `create_index`, `delete_index`) are sent
//! exactly once.
//!
//! | Operation | Request |
//! |--------|---------|
//! | `info` | `GET /` |
//! | `index_exists` | `HEAD /{index}` |
//! | `create_index` | `PUT /{index}` |
//! | `delete_index` | `DELETE /{index}` |
//! | `bulk_write` | `POST /_bulk` (NDJSON) |
//! | `refresh_index` | `POST /{index}/_refresh` |
//! | `search` | `POST /{index}/_search` |
//! | `stats` | `GET /{index}/_stats` |

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::SearchBackend;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::models::{
    BulkOutcome, ClusterInfo, IndexStats, IndexedDocument, SearchHit, SearchResults,
};
use crate::schema::SchemaDefinition;
use crate::search::SearchRequest;

/// Client handle for one Elasticsearch cluster.
pub struct ElasticBackend {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    max_retries: u32,
}

impl ElasticBackend {
    /// Build a client from configuration. No request is sent.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password(),
            max_retries: config.max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Send with up to `max_retries` retries on transient failures.
    async fn send<F>(&self, build: F) -> Result<Response, BackendError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        self.send_with_retries(build, self.max_retries).await
    }

    /// Single attempt; a 429/5xx answer becomes [`BackendError::Status`].
    async fn send_once<F>(&self, build: F) -> Result<Response, BackendError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        self.send_with_retries(build, 0).await
    }

    /// Backoff: 1s, 2s, 4s, ... capped at 32s.
    async fn send_with_retries<F>(&self, build: F, retries: u32) -> Result<Response, BackendError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut last_err = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body: Value = response.json().await.unwrap_or(Value::Null);
                        last_err = Some(BackendError::Status {
                            status: status.as_u16(),
                            reason: error_reason(&body),
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    last_err = Some(BackendError::from(e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| BackendError::Transport("request failed after retries".to_string())))
    }
}

/// Turn a non-success response into a [`BackendError::Status`].
async fn status_error(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    BackendError::Status {
        status,
        reason: error_reason(&body),
    }
}

/// Pull a readable cause out of an Elasticsearch error body.
fn error_reason(body: &Value) -> String {
    let error = &body["error"];
    match (error["type"].as_str(), error["reason"].as_str()) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (None, Some(reason)) => reason.to_string(),
        _ => error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

/// Encode a batch as `_bulk` NDJSON: an `index` action line followed by
/// the document source, per document.
pub fn bulk_body(index: &str, batch: &[(u64, IndexedDocument)]) -> Result<String, BackendError> {
    let mut body = String::new();
    for (id, doc) in batch {
        let action = json!({ "index": { "_index": index, "_id": id.to_string() } });
        let source = serde_json::to_string(doc)
            .map_err(|e| BackendError::Decode(format!("document {}: {}", id, e)))?;
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

/// Map a `_bulk` response onto per-document outcomes in batch order.
pub fn parse_bulk_response(
    json: &Value,
    batch: &[(u64, IndexedDocument)],
) -> Result<Vec<BulkOutcome>, BackendError> {
    let items = json
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Decode("bulk response without items".to_string()))?;

    if items.len() != batch.len() {
        return Err(BackendError::Decode(format!(
            "bulk response has {} items for {} documents",
            items.len(),
            batch.len()
        )));
    }

    let outcomes = items
        .iter()
        .zip(batch)
        .map(|(item, (id, _))| {
            // Each item is keyed by its action: {"index": {...}}.
            let status_obj = item
                .as_object()
                .and_then(|m| m.values().next())
                .unwrap_or(&Value::Null);
            let status = status_obj["status"].as_u64().unwrap_or(0);

            if (200..300).contains(&status) {
                BulkOutcome::accepted(*id)
            } else if status_obj.get("error").is_some() {
                BulkOutcome::rejected(*id, error_reason(status_obj))
            } else {
                BulkOutcome::rejected(*id, format!("status {}", status))
            }
        })
        .collect();

    Ok(outcomes)
}

/// Parse `hits.total.value` and `hits.hits[]` of a `_search` response.
pub fn parse_search_response(json: &Value) -> Result<SearchResults, BackendError> {
    let hits_obj = json
        .get("hits")
        .ok_or_else(|| BackendError::Decode("search response without hits".to_string()))?;

    // Older clusters report a bare number.
    let total = hits_obj["total"]["value"]
        .as_u64()
        .or_else(|| hits_obj["total"].as_u64())
        .unwrap_or(0);

    let hits = hits_obj["hits"]
        .as_array()
        .map(|arr| arr.iter().map(parse_hit).collect())
        .unwrap_or_default();

    Ok(SearchResults { total, hits })
}

fn parse_hit(hit: &Value) -> SearchHit {
    let source = &hit["_source"];
    SearchHit {
        id: hit["_id"].as_str().unwrap_or_default().to_string(),
        score: hit["_score"].as_f64().unwrap_or(0.0),
        title: source["title"].as_str().unwrap_or_default().to_string(),
        opening_text: source["opening_text"].as_str().map(str::to_string),
        timestamp: source["timestamp"].as_str().map(str::to_string),
        namespace: source["namespace"].as_i64(),
    }
}

fn parse_stats_response(json: &Value, index: &str) -> Result<IndexStats, BackendError> {
    let total = &json["indices"][index]["total"];
    let doc_count = total["docs"]["count"]
        .as_u64()
        .ok_or_else(|| BackendError::Decode(format!("no doc count for index {}", index)))?;
    let size_bytes = total["store"]["size_in_bytes"].as_u64().unwrap_or(0);
    Ok(IndexStats {
        doc_count,
        size_bytes,
    })
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    async fn info(&self) -> Result<ClusterInfo, BackendError> {
        let response = self.send(|| self.request(Method::GET, "/")).await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: Value = response.json().await?;
        Ok(ClusterInfo {
            version: body["version"]["number"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            cluster_name: body["cluster_name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
        })
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        let response = self.send_once(|| self.request(Method::HEAD, index)).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(BackendError::Status {
                status: s.as_u16(),
                reason: "index existence check failed".to_string(),
            }),
        }
    }

    async fn create_index(
        &self,
        index: &str,
        schema: &SchemaDefinition,
    ) -> Result<(), BackendError> {
        let body = schema.to_json();
        let response = self
            .send_once(|| self.request(Method::PUT, index).json(&body))
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status == StatusCode::BAD_REQUEST
            && body["error"]["type"].as_str() == Some("resource_already_exists_exception")
        {
            return Err(BackendError::IndexExists(index.to_string()));
        }
        Err(BackendError::Status {
            status: status.as_u16(),
            reason: error_reason(&body),
        })
    }

    async fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        let response = self.send_once(|| self.request(Method::DELETE, index)).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(BackendError::IndexNotFound(index.to_string())),
            _ => Err(status_error(response).await),
        }
    }

    async fn bulk_write(
        &self,
        index: &str,
        batch: &[(u64, IndexedDocument)],
    ) -> Result<Vec<BulkOutcome>, BackendError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let body = bulk_body(index, batch)?;
        debug!(index, documents = batch.len(), bytes = body.len(), "bulk request");

        let response = self
            .send(|| {
                self.request(Method::POST, "_bulk")
                    .header("Content-Type", "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let json: Value = response.json().await?;
        parse_bulk_response(&json, batch)
    }

    async fn refresh_index(&self, index: &str) -> Result<(), BackendError> {
        let path = format!("{}/_refresh", index);
        let response = self.send(|| self.request(Method::POST, &path)).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(BackendError::IndexNotFound(index.to_string())),
            _ => Err(status_error(response).await),
        }
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResults, BackendError> {
        let path = format!("{}/_search", index);
        let body = request.to_json();
        let response = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;

        match response.status() {
            s if s.is_success() => {
                let json: Value = response.json().await?;
                parse_search_response(&json)
            }
            StatusCode::NOT_FOUND => Err(BackendError::IndexNotFound(index.to_string())),
            _ => Err(status_error(response).await),
        }
    }

    async fn stats(&self, index: &str) -> Result<IndexStats, BackendError> {
        let path = format!("{}/_stats", index);
        let response = self.send(|| self.request(Method::GET, &path)).await?;

        match response.status() {
            s if s.is_success() => {
                let json: Value = response.json().await?;
                parse_stats_response(&json, index)
            }
            StatusCode::NOT_FOUND => Err(BackendError::IndexNotFound(index.to_string())),
            _ => Err(status_error(response).await),
        }
    }
}
