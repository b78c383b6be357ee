
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{Existence, QueryResult, StoredItem, VectorStore, check_dimension, cosine_similarity};
use crate::{RagError, Result};

type Collections = HashMap<String, HashMap<String, StoredItem>>;

/// Process-local store. Search is an exact scan ranked by cosine similarity.
#[derive(Debug)]
pub struct InMemoryStore {
    collections: RwLock<Collections>,
    vector_dimension: usize,
}

impl InMemoryStore {
    #[inline]
    pub fn new(vector_dimension: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            vector_dimension,
        }
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    /// Copy of a stored item, if any
    #[inline]
    pub fn get(&self, collection: &str, id: &str) -> Option<StoredItem> {
        self.collections
            .read()
            .ok()?
            .get(collection)?
            .get(id)
            .cloned()
    }
}

fn poisoned() -> RagError {
    RagError::Database("In-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn prepare(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn lookup(&self, collection: &str, id: &str) -> Existence {
        let Ok(collections) = self.collections.read() else {
            return Existence::CheckFailed("In-memory store lock poisoned".to_string());
        };

        match collections.get(collection) {
            Some(items) if items.contains_key(id) => Existence::Found,
            _ => Existence::NotFound,
        }
    }

    async fn upsert(&self, collection: &str, item: StoredItem) -> Result<()> {
        check_dimension(self.vector_dimension, item.embedding.len())?;

        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        debug!("Upserting {} into in-memory collection {}", item.id, collection);
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(item.id.clone(), item);
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryResult>> {
        check_dimension(self.vector_dimension, embedding.len())?;

        let collections = self.collections.read().map_err(|_| poisoned())?;
        let Some(items) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<QueryResult> = items
            .values()
            .map(|item| QueryResult::from_item(item, cosine_similarity(embedding, &item.embedding)))
            .collect();

        results.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        let collections = self.collections.read().map_err(|_| poisoned())?;
        Ok(collections
            .get(collection)
            .map_or(0, |items| items.len() as u64))
    }
}
