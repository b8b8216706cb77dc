//! Ranked free-text search over the index.
//!
//! Queries are a `best_fields` multi-match over `title^3`,
//! `opening_text^2`, and `text`; the backend's BM25 similarity does the
//! ranking. Used by `cirrus search` and `cirrus sample`.

use anyhow::Result;
use serde_json::{json, Value};

use crate::backend::{self, SearchBackend};
use crate::config::Config;
use crate::error::BackendError;
use crate::models::{SearchHit, SearchResults};

/// Field and boost pair of a multi-match query.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldBoost {
    pub field: String,
    pub boost: f32,
}

impl FieldBoost {
    pub fn new(field: &str, boost: f32) -> Self {
        Self {
            field: field.to_string(),
            boost,
        }
    }

    /// Elasticsearch notation, e.g. `title^3`.
    pub fn to_query_field(&self) -> String {
        if (self.boost - 1.0).abs() < f32::EPSILON {
            self.field.clone()
        } else {
            format!("{}^{}", self.field, self.boost)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    MultiMatch { query: String, fields: Vec<FieldBoost> },
    MatchAll,
}

/// A query plus paging and `_source` filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: SearchQuery,
    pub size: usize,
    pub source_fields: Vec<String>,
}

/// Fields returned with each hit.
pub const HIT_SOURCE_FIELDS: &[&str] = &["title", "opening_text", "timestamp", "namespace"];

impl SearchRequest {
    /// The ranked query used for user searches.
    pub fn ranked(query: &str, size: usize) -> Self {
        Self {
            query: SearchQuery::MultiMatch {
                query: query.to_string(),
                fields: vec![
                    FieldBoost::new("title", 3.0),
                    FieldBoost::new("opening_text", 2.0),
                    FieldBoost::new("text", 1.0),
                ],
            },
            size,
            source_fields: source_fields(),
        }
    }

    /// Unranked listing of indexed documents.
    pub fn match_all(size: usize) -> Self {
        Self {
            query: SearchQuery::MatchAll,
            size,
            source_fields: source_fields(),
        }
    }

    pub fn to_json(&self) -> Value {
        let query = match &self.query {
            SearchQuery::MultiMatch { query, fields } => json!({
                "multi_match": {
                    "query": query,
                    "fields": fields.iter().map(FieldBoost::to_query_field).collect::<Vec<_>>(),
                    "type": "best_fields",
                }
            }),
            SearchQuery::MatchAll => json!({ "match_all": {} }),
        };

        json!({
            "query": query,
            "size": self.size,
            "_source": self.source_fields,
        })
    }
}

fn source_fields() -> Vec<String> {
    HIT_SOURCE_FIELDS.iter().map(|f| f.to_string()).collect()
}

/// Run a ranked query. A blank query returns no hits without a backend call.
pub async fn search(
    backend: &dyn SearchBackend,
    index: &str,
    query: &str,
    size: usize,
) -> Result<SearchResults, BackendError> {
    if query.trim().is_empty() {
        return Ok(SearchResults::default());
    }
    backend
        .search(index, &SearchRequest::ranked(query.trim(), size))
        .await
}

/// Fetch up to `count` indexed documents, unranked.
pub async fn sample(
    backend: &dyn SearchBackend,
    index: &str,
    count: usize,
) -> Result<SearchResults, BackendError> {
    backend.search(index, &SearchRequest::match_all(count)).await
}

pub async fn run_search(config: &Config, query: &str, size: Option<usize>) -> Result<()> {
    let size = size.unwrap_or(config.search.size);
    if size == 0 {
        anyhow::bail!("--size must be >= 1");
    }
    let backend = backend::connect(config)?;

    let results = search(backend.as_ref(), &config.backend.index, query, size).await?;

    if results.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!(
        "{} matching documents, top {} by BM25 score",
        results.total,
        results.hits.len()
    );
    println!();
    print_hits(&results.hits, true);
    Ok(())
}

pub async fn run_sample(config: &Config, count: usize) -> Result<()> {
    let backend = backend::connect(config)?;
    let results = sample(backend.as_ref(), &config.backend.index, count).await?;

    if results.hits.is_empty() {
        println!("No documents indexed.");
        return Ok(());
    }
    print_hits(&results.hits, false);
    Ok(())
}

fn print_hits(hits: &[SearchHit], with_score: bool) {
    for (i, hit) in hits.iter().enumerate() {
        let title = if hit.title.is_empty() {
            "(untitled)"
        } else {
            hit.title.as_str()
        };
        println!("{}. {}", i + 1, title);
        if with_score {
            println!("    score: {:.4}", hit.score);
        }
        if let Some(ns) = hit.namespace {
            println!("    namespace: {}", ns);
        }
        if let Some(ref ts) = hit.timestamp {
            println!("    updated: {}", format_timestamp(ts));
        }
        if let Some(ref opening) = hit.opening_text {
            println!(
                "    summary: \"{}\"",
                truncate_chars(opening, 150).replace('\n', " ").trim()
            );
        }
        println!("    id: {}", hit.id);
        println!();
    }
}

/// RFC 3339 timestamps are shown as dates; anything else verbatim.
fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::models::IndexedDocument;
    use crate::schema::SchemaDefinition;

    #[test]
    fn ranked_request_matches_boosted_fields() {
        let body = SearchRequest::ranked("대한민국 수도", 5).to_json();
        assert_eq!(
            body,
            json!({
                "query": {
                    "multi_match": {
                        "query": "대한민국 수도",
                        "fields": ["title^3", "opening_text^2", "text"],
                        "type": "best_fields",
                    }
                },
                "size": 5,
                "_source": ["title", "opening_text", "timestamp", "namespace"],
            })
        );
    }

    #[test]
    fn match_all_request() {
        let body = SearchRequest::match_all(3).to_json();
        assert_eq!(body["query"], json!({ "match_all": {} }));
        assert_eq!(body["size"], 3);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("가나다라", 2), "가나...");
        assert_eq!(truncate_chars("가나", 2), "가나");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn timestamp_formatting() {
        assert_eq!(format_timestamp("2025-09-20T12:00:00Z"), "2025-09-20");
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn blank_query_skips_backend() {
        let backend = InMemoryBackend::new();
        backend.set_unavailable(true);
        let results = search(&backend, "wiki", "   ", 5).await.unwrap();
        assert_eq!(results.total, 0);
        assert!(results.hits.is_empty());
    }

    #[tokio::test]
    async fn title_matches_rank_above_body_matches() {
        let backend = InMemoryBackend::new();
        backend
            .create_index("wiki", &SchemaDefinition::korean_wiki())
            .await
            .unwrap();
        let body_only = IndexedDocument {
            title: "부산".to_string(),
            text: "서울에서 기차로 세 시간".to_string(),
            ..Default::default()
        };
        let in_title = IndexedDocument {
            title: "서울".to_string(),
            text: "대한민국의 수도".to_string(),
            ..Default::default()
        };
        backend
            .bulk_write("wiki", &[(1, body_only), (2, in_title)])
            .await
            .unwrap();
        backend.refresh_index("wiki").await.unwrap();

        let results = search(&backend, "wiki", "서울", 5).await.unwrap();
        assert_eq!(results.total, 2);
        assert_eq!(results.hits[0].id, "2");
        assert_eq!(results.hits[1].id, "1");
    }
}
