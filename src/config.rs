//! TOML configuration parsing and validation.
//!
//! Every command reads the same file (default `./config/cirrus.toml`).
//! Only `[backend].url` is required; all other keys have defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Name of the environment variable holding the basic-auth password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_index() -> String {
    "kowiki_cirrus".to_string()
}
fn default_password_env() -> String {
    "ELASTIC_PASSWORD".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl BackendConfig {
    /// Resolve the password from the configured environment variable.
    pub fn password(&self) -> Option<String> {
        std::env::var(&self.password_env).ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            limit: None,
            workers: default_workers(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}
fn default_workers() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_size")]
    pub size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            size: default_search_size(),
        }
    }
}

fn default_search_size() -> usize {
    5
}

impl Config {
    /// A localhost configuration with every default applied.
    pub fn minimal() -> Self {
        Self {
            backend: BackendConfig {
                url: "http://localhost:9200".to_string(),
                index: default_index(),
                username: None,
                password_env: default_password_env(),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
            },
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    if config.backend.url.trim().is_empty() {
        anyhow::bail!("backend.url must not be empty");
    }
    if config.backend.index.trim().is_empty() {
        anyhow::bail!("backend.index must not be empty");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be > 0");
    }
    if config.ingest.limit == Some(0) {
        anyhow::bail!("ingest.limit must be > 0 (omit it to ingest the whole dump)");
    }

    if config.search.size == 0 {
        anyhow::bail!("search.size must be >= 1");
    }

    Ok(())
}
