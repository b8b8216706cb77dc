//! Index settings, field mappings, and their lifecycle.
//!
//! [`SchemaDefinition`] declares the Korean analysis chain (nori tokenizer
//! in mixed decompounding mode, lowercase → part-of-speech → reading-form
//! filters), BM25 similarity, and the field mappings. [`SchemaManager`]
//! creates the index from it, or destroys and recreates it when the caller
//! asks for a fresh index. Dropping an index takes no backup.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::backend::{self, SearchBackend};
use crate::config::Config;
use crate::error::{BackendError, SchemaError};

/// Tokenizer decompounding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompoundMode {
    None,
    Discard,
    Mixed,
}

impl DecompoundMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecompoundMode::None => "none",
            DecompoundMode::Discard => "discard",
            DecompoundMode::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerSpec {
    pub name: String,
    pub kind: String,
    pub decompound_mode: DecompoundMode,
    pub discard_punctuation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSpec {
    pub name: String,
    pub tokenizer: TokenizerSpec,
    /// Token filters, applied in order.
    pub filters: Vec<String>,
}

/// BM25 similarity parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25 {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMapping {
    /// Analyzed with the schema analyzer; optionally with a `keyword` sub-field.
    Text { keyword_subfield: bool },
    Keyword,
    Date,
    Integer,
}

/// Declared analysis chain, similarity, and field mappings of the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    pub analyzer: AnalyzerSpec,
    pub similarity: Bm25,
    pub fields: Vec<(String, FieldMapping)>,
}

impl Default for SchemaDefinition {
    fn default() -> Self {
        Self::korean_wiki()
    }
}

impl SchemaDefinition {
    /// Schema for Korean Wikipedia CirrusSearch documents.
    pub fn korean_wiki() -> Self {
        let fields = [
            ("title", FieldMapping::Text { keyword_subfield: true }),
            ("text", FieldMapping::Text { keyword_subfield: false }),
            ("opening_text", FieldMapping::Text { keyword_subfield: false }),
            ("category", FieldMapping::Keyword),
            ("template", FieldMapping::Keyword),
            ("redirect", FieldMapping::Keyword),
            ("timestamp", FieldMapping::Date),
            ("namespace", FieldMapping::Integer),
            ("incoming_links", FieldMapping::Integer),
        ];

        Self {
            analyzer: AnalyzerSpec {
                name: "korean_analyzer".to_string(),
                tokenizer: TokenizerSpec {
                    name: "nori_user_dict".to_string(),
                    kind: "nori_tokenizer".to_string(),
                    decompound_mode: DecompoundMode::Mixed,
                    discard_punctuation: true,
                },
                filters: vec![
                    "lowercase".to_string(),
                    "nori_part_of_speech".to_string(),
                    "nori_readingform".to_string(),
                ],
            },
            similarity: Bm25::default(),
            fields: fields
                .into_iter()
                .map(|(name, mapping)| (name.to_string(), mapping))
                .collect(),
        }
    }

    /// Index creation body: `{"settings": {...}, "mappings": {...}}`.
    pub fn to_json(&self) -> Value {
        let tokenizer = &self.analyzer.tokenizer;

        let mut properties = Map::new();
        for (name, mapping) in &self.fields {
            properties.insert(name.clone(), self.mapping_json(*mapping));
        }

        json!({
            "settings": {
                "analysis": {
                    "tokenizer": {
                        tokenizer.name.as_str(): {
                            "type": tokenizer.kind,
                            "decompound_mode": tokenizer.decompound_mode.as_str(),
                            "discard_punctuation": tokenizer.discard_punctuation.to_string(),
                        }
                    },
                    "analyzer": {
                        self.analyzer.name.as_str(): {
                            "type": "custom",
                            "tokenizer": tokenizer.name,
                            "filter": self.analyzer.filters,
                        }
                    }
                },
                "similarity": {
                    "default": {
                        "type": "BM25",
                        "k1": self.similarity.k1,
                        "b": self.similarity.b,
                    }
                }
            },
            "mappings": { "properties": properties }
        })
    }

    fn mapping_json(&self, mapping: FieldMapping) -> Value {
        match mapping {
            FieldMapping::Text { keyword_subfield } => {
                let mut field = json!({ "type": "text", "analyzer": self.analyzer.name });
                if keyword_subfield {
                    field["fields"] = json!({ "keyword": { "type": "keyword" } });
                }
                field
            }
            FieldMapping::Keyword => json!({ "type": "keyword" }),
            FieldMapping::Date => json!({ "type": "date" }),
            FieldMapping::Integer => json!({ "type": "integer" }),
        }
    }
}

/// Caller's choice when the index may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDecision {
    /// Keep an existing index; create it only when missing.
    Reuse,
    /// Delete any existing index and create it from the schema.
    Recreate,
}

/// What [`SchemaManager::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    Created,
    Existing,
    Recreated,
}

/// Creates and recreates the index from a [`SchemaDefinition`].
pub struct SchemaManager {
    backend: Arc<dyn SearchBackend>,
    index: String,
    schema: SchemaDefinition,
}

impl SchemaManager {
    pub fn new(backend: Arc<dyn SearchBackend>, index: impl Into<String>) -> Self {
        Self::with_schema(backend, index, SchemaDefinition::korean_wiki())
    }

    pub fn with_schema(
        backend: Arc<dyn SearchBackend>,
        index: impl Into<String>,
        schema: SchemaDefinition,
    ) -> Self {
        Self {
            backend,
            index: index.into(),
            schema,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.schema
    }

    /// Apply the caller's decision.
    pub async fn ensure(&self, decision: IndexDecision) -> Result<SchemaOutcome, SchemaError> {
        match decision {
            IndexDecision::Reuse => self.ensure_schema().await,
            IndexDecision::Recreate => {
                self.drop_and_recreate().await?;
                Ok(SchemaOutcome::Recreated)
            }
        }
    }

    /// Create the index unless it already exists.
    pub async fn ensure_schema(&self) -> Result<SchemaOutcome, SchemaError> {
        if self.backend.index_exists(&self.index).await.map_err(|e| self.fail(e))? {
            info!(index = %self.index, "index exists, keeping it");
            return Ok(SchemaOutcome::Existing);
        }
        self.create().await?;
        Ok(SchemaOutcome::Created)
    }

    /// Delete the index if present, then create it from the schema.
    pub async fn drop_and_recreate(&self) -> Result<(), SchemaError> {
        if self.backend.index_exists(&self.index).await.map_err(|e| self.fail(e))? {
            match self.backend.delete_index(&self.index).await {
                Ok(()) | Err(BackendError::IndexNotFound(_)) => {
                    info!(index = %self.index, "deleted existing index");
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
        self.create().await
    }

    async fn create(&self) -> Result<(), SchemaError> {
        self.backend
            .create_index(&self.index, &self.schema)
            .await
            .map_err(|e| self.fail(e))?;
        info!(
            index = %self.index,
            analyzer = %self.schema.analyzer.name,
            k1 = self.schema.similarity.k1,
            b = self.schema.similarity.b,
            "created index"
        );
        Ok(())
    }

    fn fail(&self, source: BackendError) -> SchemaError {
        SchemaError {
            index: self.index.clone(),
            source,
        }
    }
}

/// True when the index exists and holds at least one document.
pub async fn index_has_data(
    backend: &dyn SearchBackend,
    index: &str,
) -> Result<bool, BackendError> {
    if !backend.index_exists(index).await? {
        return Ok(false);
    }
    Ok(backend.stats(index).await?.doc_count > 0)
}

/// `cirrus init`: create the index, or drop and recreate it.
pub async fn run_init(config: &Config, recreate: bool) -> anyhow::Result<()> {
    let backend = backend::connect(config)?;
    let manager = SchemaManager::new(backend, config.backend.index.clone());
    let decision = if recreate {
        IndexDecision::Recreate
    } else {
        IndexDecision::Reuse
    };

    let outcome = manager.ensure(decision).await?;
    let state = match outcome {
        SchemaOutcome::Created => "created",
        SchemaOutcome::Existing => "already exists (kept)",
        SchemaOutcome::Recreated => "recreated",
    };
    println!("init {}", manager.index());
    println!("  index: {}", state);
    println!("  analyzer: {}", manager.schema().analyzer.name);
    println!(
        "  similarity: BM25 (k1={}, b={})",
        manager.schema().similarity.k1,
        manager.schema().similarity.b
    );
    println!("ok");
    Ok(())
}
