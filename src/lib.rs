use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Missing template variable: {0}")]
    MissingVariable(String),

    #[error("Transient error from {service}: {message}")]
    TransientService {
        service: &'static str,
        message: String,
    },

    #[error("Error from {service}: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("No stored record matches the query: {0}")]
    NoMatchFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether retrying the same call later could succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService { .. })
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod connection;
pub mod database;
pub mod embeddings;
pub mod http;
pub mod ingest;
pub mod memory;
pub mod prompt;
pub mod query;

#[cfg(test)]
mod testing;
