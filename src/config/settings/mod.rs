
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::index::IndexPaths;
use crate::retriever::RetrievalConfig;

/// Environment variable that overrides `schema.schema_path`
pub const SCHEMA_PATH_ENV: &str = "NEO4J_SCHEMA_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub max_concurrent_requests: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            max_concurrent_requests: 4,
        }
    }
}

/// Locations of the schema document and its index artifacts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<PathBuf>,
    /// Defaults to the schema path with a `lance` extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,
    /// Defaults to the schema path with a `rows.json` extension
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid concurrent request limit: {0} (must be between 1 and 64)")]
    InvalidConcurrency(u32),
    #[error("Invalid {0}: {1} (must be between 1 and 1000)")]
    InvalidNeighborCount(&'static str, usize),
    #[error("Invalid tau: {0} (must be greater than 0 and at most 1)")]
    InvalidTau(f32),
    #[error("Invalid {0}: {1} (must be a positive number)")]
    InvalidWeight(&'static str, f32),
    #[error("No schema path configured (set schema.schema_path or NEO4J_SCHEMA_PATH)")]
    MissingSchemaPath,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.schema-slice`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".schema-slice"))
            .or_else(|| dirs::data_dir().map(|data| data.join("schema-slice")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;

            toml::from_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };
        config.base_dir = config_dir.as_ref().to_path_buf();
        config.apply_env_overrides();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Apply `NEO4J_SCHEMA_PATH` when set and non-empty
    #[inline]
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = std::env::var_os(SCHEMA_PATH_ENV).filter(|p| !p.is_empty()) {
            debug!("Using schema path from {}", SCHEMA_PATH_ENV);
            self.schema.schema_path = Some(PathBuf::from(path));
        }
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    /// Resolve schema, index and row-list paths
    #[inline]
    pub fn index_paths(&self) -> Result<IndexPaths, ConfigError> {
        let schema_path = self
            .schema
            .schema_path
            .as_ref()
            .ok_or(ConfigError::MissingSchemaPath)?;

        let mut paths = IndexPaths::for_schema(schema_path);
        if let Some(index_path) = &self.schema.index_path {
            paths.index.clone_from(index_path);
        }
        if let Some(rows_path) = &self.schema.rows_path {
            paths.rows.clone_from(rows_path);
        }
        Ok(paths)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_retrieval_config()?;
        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        for (name, value) in [
            ("k_question", config.k_question),
            ("k_token", config.k_token),
            ("top_k", config.top_k),
        ] {
            if !(1..=1000).contains(&value) {
                return Err(ConfigError::InvalidNeighborCount(name, value));
            }
        }

        if !(config.tau > 0.0 && config.tau <= 1.0) {
            return Err(ConfigError::InvalidTau(config.tau));
        }

        for (name, value) in [
            ("exact_match_weight", config.exact_match_weight),
            ("token_weight", config.token_weight),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidWeight(name, value));
            }
        }

        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=64).contains(&self.max_concurrent_requests) {
            return Err(ConfigError::InvalidConcurrency(
                self.max_concurrent_requests,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        let url = Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str.clone()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(url_str));
        }
        Ok(url)
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_max_concurrent_requests(&mut self, limit: u32) -> Result<(), ConfigError> {
        if !(1..=64).contains(&limit) {
            return Err(ConfigError::InvalidConcurrency(limit));
        }
        self.max_concurrent_requests = limit;
        Ok(())
    }
}
