#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

pub const ENV_OPENAI_ENDPOINT: &str = "AZURE_OAI_ENDPOINT";
pub const ENV_OPENAI_KEY: &str = "AZURE_OAI_KEY";
pub const ENV_CHAT_DEPLOYMENT: &str = "AZURE_OAI_GPT4O_DEPLOYMENT";
pub const ENV_EMBEDDING_DEPLOYMENT: &str = "AZURE_OAI_EMBEDDING_DEPLOYMENT";
pub const ENV_DATABASE_NAME: &str = "AZCOSMOS_DATABASE_NAME";
pub const ENV_CONTAINER_NAME: &str = "AZCOSMOS_CONTAINER_NAME";
pub const ENV_STORE_USERNAME: &str = "AZCOSMOS_USERNAME";
pub const ENV_STORE_PASSWORD: &str = "AZCOSMOS_PASSWORD";
pub const ENV_STORE_RESOURCE: &str = "AZCOSMOS_RESOURCE_NAME";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Azure OpenAI connection settings. The API key lives in [`Credentials`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub embedding_deployment: String,
    pub chat_deployment: String,
    pub api_version: String,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            embedding_deployment: String::new(),
            chat_deployment: String::new(),
            api_version: "2024-02-01".to_string(),
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Delay between answering a query and accepting the next one
    pub pause_ms: u64,
    pub search_limit: usize,
    pub prompt_template_file: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.1,
            top_p: 0.5,
            pause_ms: 1000,
            search_limit: 1,
            prompt_template_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    Lancedb,
    CosmosMongo,
    Memory,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lancedb => write!(f, "lancedb"),
            Self::CosmosMongo => write!(f, "cosmos-mongo"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Vector store settings. Index parameters are applied once, when the
/// collection is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_name: String,
    pub collection: String,
    pub index_name: String,
    pub vector_dimension: u32,
    pub num_lists: u32,
    pub similarity: String,
    pub username: String,
    pub resource_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_name: "sk-rag-db".to_string(),
            collection: "sk-rag-container".to_string(),
            index_name: "VectorSearchIndex".to_string(),
            vector_dimension: DEFAULT_EMBEDDING_DIMENSION,
            num_lists: 1,
            similarity: "COS".to_string(),
            username: String::new(),
            resource_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub data_file: PathBuf,
    pub workers: usize,
    /// Run ingestion before the interactive loop starts
    pub on_start: bool,
    pub continue_on_error: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data.json"),
            workers: 1,
            on_start: false,
            continue_on_error: false,
        }
    }
}

/// Secrets read from the process environment only. They are never written to
/// the config file and never logged.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<SecretString>,
    pub store_password: Option<SecretString>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid request timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid max tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxTokens(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_p: {0} (must be between 0.0 and 1.0)")]
    InvalidTopP(f32),
    #[error("Invalid search limit: {0} (must be between 1 and 100)")]
    InvalidSearchLimit(usize),
    #[error("Invalid embedding dimension: {0} (must be between 2 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid list count: {0} (must be between 1 and 65536)")]
    InvalidNumLists(u32),
    #[error("Invalid similarity: {0} (must be 'COS', 'IP' or 'L2')")]
    InvalidSimilarity(String),
    #[error("Invalid collection name: {0:?}")]
    InvalidCollection(String),
    #[error("Invalid worker count: {0} (must be between 1 and 64)")]
    InvalidWorkers(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.grounded-rag`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".grounded-rag"))
            .or_else(|| dirs::config_dir().map(|dir| dir.join("grounded-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`, falling back to defaults when the
    /// file does not exist, then overlay the process environment.
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load_file(config_dir)?;
        config.apply_env(|key| std::env::var(key).ok());

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load `config.toml` without looking at the environment
    #[inline]
    pub fn load_file<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            debug!("No config file at {}, using defaults", config_path.display());
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        Ok(config)
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

    /// Overlay non-empty values from an environment-style lookup
    #[inline]
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(ENV_OPENAI_ENDPOINT) {
            self.openai.endpoint = value;
        }
        if let Some(value) = get(ENV_CHAT_DEPLOYMENT) {
            self.openai.chat_deployment = value;
        }
        if let Some(value) = get(ENV_EMBEDDING_DEPLOYMENT) {
            self.openai.embedding_deployment = value;
        }
        if let Some(value) = get(ENV_DATABASE_NAME) {
            self.store.database_name = value;
        }
        if let Some(value) = get(ENV_CONTAINER_NAME) {
            self.store.collection = value;
        }
        if let Some(value) = get(ENV_STORE_USERNAME) {
            self.store.username = value;
        }
        if let Some(value) = get(ENV_STORE_RESOURCE) {
            self.store.resource_name = value;
        }
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

    /// Directory holding the local LanceDB tables
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// Data file path, resolved against the config directory when relative
    #[inline]
    pub fn data_file_path(&self) -> PathBuf {
        if self.ingest.data_file.is_absolute() {
            self.ingest.data_file.clone()
        } else {
            self.get_base_dir().join(&self.ingest.data_file)
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.validate()?;
        self.chat.validate()?;
        self.store.validate()?;
        self.ingest.validate()?;
        Ok(())
    }

    /// Check that everything needed to reach the model services is present.
    /// Startup fails on the first missing setting.
    #[inline]
    pub fn require_services(&self, credentials: &Credentials) -> Result<(), ConfigError> {
        if self.openai.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingSetting(ENV_OPENAI_ENDPOINT));
        }
        self.openai.endpoint_url()?;

        if credentials.openai_api_key.is_none() {
            return Err(ConfigError::MissingSetting(ENV_OPENAI_KEY));
        }
        if self.openai.embedding_deployment.trim().is_empty() {
            return Err(ConfigError::MissingSetting(ENV_EMBEDDING_DEPLOYMENT));
        }
        if self.openai.chat_deployment.trim().is_empty() {
            return Err(ConfigError::MissingSetting(ENV_CHAT_DEPLOYMENT));
        }

        if self.store.backend == StoreBackend::CosmosMongo {
            if self.store.database_name.trim().is_empty() {
                return Err(ConfigError::MissingSetting(ENV_DATABASE_NAME));
            }
            if self.store.username.trim().is_empty() {
                return Err(ConfigError::MissingSetting(ENV_STORE_USERNAME));
            }
            if credentials.store_password.is_none() {
                return Err(ConfigError::MissingSetting(ENV_STORE_PASSWORD));
            }
            if self.store.resource_name.trim().is_empty() {
                return Err(ConfigError::MissingSetting(ENV_STORE_RESOURCE));
            }
        }

        Ok(())
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.trim().is_empty() {
            self.endpoint_url()?;
        }

        if !(1..=600).contains(&self.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        if self.api_version.trim().is_empty() {
            return Err(ConfigError::MissingSetting("openai.api_version"));
        }

        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(self.endpoint.trim())
            .map_err(|_| ConfigError::InvalidUrl(self.endpoint.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.endpoint.clone()));
        }
        Ok(url)
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=32768).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(ConfigError::InvalidTopP(self.top_p));
        }

        if !(1..=100).contains(&self.search_limit) {
            return Err(ConfigError::InvalidSearchLimit(self.search_limit));
        }

        Ok(())
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&self.collection) {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }

        if !(2..=4096).contains(&self.vector_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.vector_dimension,
            ));
        }

        if !(1..=65536).contains(&self.num_lists) {
            return Err(ConfigError::InvalidNumLists(self.num_lists));
        }

        if !matches!(self.similarity.as_str(), "COS" | "IP" | "L2") {
            return Err(ConfigError::InvalidSimilarity(self.similarity.clone()));
        }

        Ok(())
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=64).contains(&self.workers) {
            return Err(ConfigError::InvalidWorkers(self.workers));
        }
        Ok(())
    }
}

impl Credentials {
    /// Read secrets from an environment-style lookup
    #[inline]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .map(SecretString::new)
        };

        Self {
            openai_api_key: secret(ENV_OPENAI_KEY),
            store_password: secret(ENV_STORE_PASSWORD),
        }
    }

    #[inline]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Collection names double as LanceDB table names and MongoDB collection names
fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 120
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
