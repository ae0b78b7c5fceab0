//! Configuration management for the pubvec pipeline.
//!
//! This module handles loading and merging configuration from multiple
//! sources:
//! - Environment variables
//! - Command-line flags
//! - Config files (pubvec.yaml)
//!
//! The configuration is loaded once at the process entry point and passed
//! explicitly into each component's constructor; no component re-reads a
//! config file on its own.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Default data directory, relative to the working directory.
const DATA_DIR: &str = ".pubvec";

/// Which article field is embedded for similarity search.
///
/// The reference behavior embeds titles; abstracts and summaries are
/// available as alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedField {
    #[default]
    Title,
    Abstract,
    Summary,
}

impl EmbedField {
    /// Parse from a CLI/config string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "title" => Some(Self::Title),
            "abstract" => Some(Self::Abstract),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Abstract => "abstract",
            Self::Summary => "summary",
        }
    }
}

/// Embedding gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Provider endpoint override (e.g. the Ollama base URL)
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_dimensions() -> usize {
    384
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: default_dimensions(),
            endpoint: None,
        }
    }
}

/// Vector index store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    /// Database file backing the vector store
    pub path: PathBuf,

    /// Collection name
    pub collection: String,

    /// Distance metric: "l2" or "cosine"
    pub metric: String,

    /// Neighbor-list size recorded for the ANN index
    #[serde(default = "default_nlist")]
    pub nlist: u32,
}

fn default_nlist() -> u32 {
    128
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DATA_DIR).join("vectors.db"),
            collection: "articles".to_string(),
            metric: "l2".to_string(),
            nlist: default_nlist(),
        }
    }
}

/// Relational record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalSettings {
    /// Database file backing the relational store
    pub path: PathBuf,

    /// Table name for article rows
    pub table: String,
}

impl Default for RelationalSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DATA_DIR).join("articles.db"),
            table: "articles".to_string(),
        }
    }
}

/// Main application configuration.
///
/// Holds all global options that affect pipeline behavior across commands.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Embedding gateway settings
    pub embedding: EmbeddingSettings,

    /// Vector index store settings
    pub vector: VectorSettings,

    /// Relational record store settings
    pub relational: RelationalSettings,

    /// Write-ahead ingest journal path
    pub journal: Option<PathBuf>,

    /// Which article field is embedded
    pub embed_field: EmbedField,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    embedding: Option<EmbeddingSettings>,
    vector: Option<VectorSettings>,
    relational: Option<RelationalSettings>,
    journal: Option<PathBuf>,
    embed_field: Option<EmbedField>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl AppConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// Environment variables:
    /// - `PUBVEC_CONFIG`: Path to config file
    /// - `PUBVEC_PROVIDER`: Embedding provider
    /// - `PUBVEC_MODEL`: Embedding model identifier
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(config_file) = std::env::var("PUBVEC_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("pubvec.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("PUBVEC_PROVIDER") {
            config.embedding.provider = provider;
        }

        if let Ok(model) = std::env::var("PUBVEC_MODEL") {
            config.embedding.model = model;
        }

        config.log_level = std::env::var("RUST_LOG").ok();

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&mut self, path: &PathBuf) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }
        if let Some(vector) = config_file.vector {
            result.vector = vector;
        }
        if let Some(relational) = config_file.relational {
            result.relational = relational;
        }
        if let Some(journal) = config_file.journal {
            result.journal = Some(journal);
        }
        if let Some(embed_field) = config_file.embed_field {
            result.embed_field = embed_field;
        }
        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the config
    /// file.
    pub fn with_overrides(
        mut self,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.embedding.provider = provider;
        }

        if let Some(model) = model {
            self.embedding.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Resolve the journal path, defaulting next to the relational database.
    pub fn journal_path(&self) -> PathBuf {
        self.journal
            .clone()
            .unwrap_or_else(|| PathBuf::from(DATA_DIR).join("ingest-journal.jsonl"))
    }

    /// Validate configuration for the active embedding provider.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["trigram", "ollama"];

        if !known_providers.contains(&self.embedding.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding.provider,
                known_providers.join(", ")
            )));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be non-zero".to_string(),
            ));
        }

        if !matches!(self.vector.metric.as_str(), "l2" | "cosine") {
            return Err(AppError::Config(format!(
                "Unknown distance metric: {}. Supported: l2, cosine",
                self.vector.metric
            )));
        }

        Ok(())
    }
}
