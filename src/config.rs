// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for docrag
//!
//! Loads configuration from .docragrc.toml in current directory or
//! ~/.config/docrag/config.toml, then applies `DOCRAG_*` environment overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Default store directory, relative to the working directory.
pub const DEFAULT_STORE_DIR: &str = "data/store";

/// Default builtin embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-small-en-v1.5";

/// Embedding provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderType {
    #[default]
    Builtin,
    Command,
    Dummy,
}

impl std::str::FromStr for EmbeddingProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "builtin" | "fastembed" => Ok(Self::Builtin),
            "command" => Ok(Self::Command),
            "dummy" => Ok(Self::Dummy),
            other => Err(format!("Unknown embedding provider: {}", other)),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the vector matrix, id list and metadata table
    pub dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Get store directory (defaults to data/store)
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider type (builtin, command, dummy)
    pub provider: Option<EmbeddingProviderType>,
    /// Model identifier for the embedding provider
    pub model: Option<String>,
    /// Command to execute for command provider
    pub command: Option<String>,
    /// Texts per provider batch
    pub batch_size: Option<usize>,
    /// Characters kept per text before embedding
    pub max_chars: Option<usize>,
    /// Declared dimensionality for providers that cannot report one
    pub dimension: Option<usize>,
}

impl EmbeddingConfig {
    /// Get provider type (defaults to Builtin)
    pub fn provider(&self) -> EmbeddingProviderType {
        self.provider.unwrap_or_default()
    }

    /// Get model identifier (defaults to BAAI/bge-small-en-v1.5)
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_EMBEDDING_MODEL)
    }

    /// Get command (defaults to "embedder")
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or("embedder")
    }

    /// Get batch size (defaults to 256)
    pub fn batch_size(&self) -> usize {
        self.batch_size.filter(|&n| n > 0).unwrap_or(256)
    }

    /// Get max chars per text (defaults to 8000)
    pub fn max_chars(&self) -> usize {
        self.max_chars.filter(|&n| n > 0).unwrap_or(8000)
    }

    /// Get declared dimension, if any
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Tokens per chunk window
    pub size: Option<usize>,
    /// Tokens shared by consecutive windows
    pub overlap: Option<usize>,
}

impl ChunkingConfig {
    /// Get chunk size (defaults to 1200)
    pub fn size(&self) -> usize {
        self.size.unwrap_or(1200)
    }

    /// Get chunk overlap (defaults to 200)
    pub fn overlap(&self) -> usize {
        self.overlap.unwrap_or(200)
    }
}

/// Search configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of results when the caller does not ask for a specific count
    pub top_k: Option<usize>,
}

impl SearchConfig {
    /// Get default top-k (defaults to 4)
    pub fn top_k(&self) -> usize {
        self.top_k.unwrap_or(4)
    }
}

/// Configuration loaded from .docragrc.toml or ~/.config/docrag/config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embeddings: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,
}

impl Config {
    /// Load configuration from files and the environment
    ///
    /// Precedence (highest to lowest):
    /// 1. DOCRAG_* environment variables
    /// 2. .docragrc.toml in current directory
    /// 3. ~/.config/docrag/config.toml
    pub fn load() -> Result<Self> {
        let mut config = Self::load_files();
        config.apply_env()?;
        Ok(config)
    }

    fn load_files() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(".docragrc.toml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("docrag").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Parse a config file, warning and returning None when it is unreadable or invalid.
    pub fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Apply DOCRAG_* environment variable overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| env::var(name))
    }

    /// Apply overrides read through `lookup`, which behaves like [`env::var`].
    ///
    /// Empty values are ignored; unparsable numbers and unknown providers are errors.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> std::result::Result<String, env::VarError>,
    {
        if let Some(dir) = read_env(&lookup, "DOCRAG_STORE_DIR")? {
            self.store.dir = Some(PathBuf::from(dir));
        }
        if let Some(provider) = read_env(&lookup, "DOCRAG_EMBEDDING_PROVIDER")? {
            let parsed = provider
                .parse::<EmbeddingProviderType>()
                .map_err(anyhow::Error::msg)
                .context("Invalid DOCRAG_EMBEDDING_PROVIDER")?;
            self.embeddings.provider = Some(parsed);
        }
        if let Some(model) = read_env(&lookup, "DOCRAG_EMBEDDING_MODEL")? {
            self.embeddings.model = Some(model);
        }
        if let Some(top_k) = parse_usize_env(&lookup, "DOCRAG_TOP_K")? {
            self.search.top_k = Some(top_k);
        }
        if let Some(size) = parse_usize_env(&lookup, "DOCRAG_CHUNK_SIZE")? {
            self.chunking.size = Some(size);
        }
        if let Some(overlap) = parse_usize_env(&lookup, "DOCRAG_CHUNK_OVERLAP")? {
            self.chunking.overlap = Some(overlap);
        }
        Ok(())
    }

    /// Get the store configuration
    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Get the embedding configuration
    pub fn embeddings(&self) -> &EmbeddingConfig {
        &self.embeddings
    }

    /// Get the chunking configuration
    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Get the search configuration
    pub fn search(&self) -> &SearchConfig {
        &self.search
    }
}

fn read_env<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> std::result::Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value.to_string()))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}

fn parse_usize_env<F>(lookup: &F, name: &str) -> Result<Option<usize>>
where
    F: Fn(&str) -> std::result::Result<String, env::VarError>,
{
    match read_env(lookup, name)? {
        Some(value) => value
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("Invalid {} value: {}", name, value)),
        None => Ok(None),
    }
}
