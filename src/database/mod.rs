// Vector store module
// One trait over three backends: local LanceDB, Cosmos DB for MongoDB vCore, and process memory


pub mod cosmos;
pub mod lancedb;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub use cosmos::CosmosMongoStore;
pub use lancedb::LanceStore;
pub use memory::InMemoryStore;

use crate::config::{Config, Credentials, StoreBackend};
use crate::{RagError, Result};

pub const METADATA_ID: &str = "id";
pub const METADATA_TITLE: &str = "title";
pub const METADATA_CONTENT: &str = "content";
pub const METADATA_ADDITIONAL: &str = "additional_metadata";

/// A record as persisted in a collection, at most one per id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    pub embedding: Vec<f32>,
    /// Record content, the text that was embedded
    pub text: String,
    /// Record title
    pub description: String,
    #[serde(default)]
    pub additional_metadata: String,
}

/// One similarity search hit. Higher relevance is better.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub id: String,
    pub text: String,
    pub description: String,
    pub relevance: f32,
    pub metadata: BTreeMap<String, String>,
}

impl QueryResult {
    #[inline]
    pub fn new(
        id: String,
        text: String,
        description: String,
        additional_metadata: String,
        relevance: f32,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_ID.to_string(), id.clone());
        metadata.insert(METADATA_TITLE.to_string(), description.clone());
        metadata.insert(METADATA_CONTENT.to_string(), text.clone());
        if !additional_metadata.is_empty() {
            metadata.insert(METADATA_ADDITIONAL.to_string(), additional_metadata);
        }

        Self {
            id,
            text,
            description,
            relevance,
            metadata,
        }
    }

    #[inline]
    pub fn from_item(item: &StoredItem, relevance: f32) -> Self {
        Self::new(
            item.id.clone(),
            item.text.clone(),
            item.description.clone(),
            item.additional_metadata.clone(),
            relevance,
        )
    }

    /// The full record as a JSON object, used as grounding context
    #[inline]
    pub fn record_json(&self) -> Result<String> {
        serde_json::to_string(&self.metadata)
            .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to serialize record: {}", e)))
    }
}

/// Outcome of an existence check. A failed check is reported, not raised, so
/// callers decide how to treat it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    Found,
    NotFound,
    CheckFailed(String),
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and its vector index if they do not exist yet
    async fn prepare(&self, collection: &str) -> Result<()>;

    async fn lookup(&self, collection: &str, id: &str) -> Existence;

    /// Insert or overwrite the item with the same id
    async fn upsert(&self, collection: &str, item: StoredItem) -> Result<()>;

    /// Up to `limit` nearest items, most relevant first
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryResult>>;

    async fn count(&self, collection: &str) -> Result<u64>;
}

/// Open the backend selected in the configuration
#[inline]
pub async fn open_store(config: &Config, credentials: &Credentials) -> Result<Arc<dyn VectorStore>> {
    let dimension = config.store.vector_dimension as usize;

    let store: Arc<dyn VectorStore> = match config.store.backend {
        StoreBackend::Lancedb => Arc::new(LanceStore::from_config(config).await?),
        StoreBackend::CosmosMongo => {
            Arc::new(CosmosMongoStore::connect(&config.store, credentials).await?)
        }
        StoreBackend::Memory => Arc::new(InMemoryStore::new(dimension)),
    };

    info!("Opened {} vector store", config.store.backend);
    Ok(store)
}

/// Cosine similarity of two equal-length vectors, 0.0 when either is zero
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b) {
        dot = x.mul_add(*y, dot);
        norm_a = x.mul_add(*x, norm_a);
        norm_b = y.mul_add(*y, norm_b);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(RagError::Database(format!(
            "Vector dimension mismatch: expected {}, got {}",
            expected, actual
        )))
    }
}
