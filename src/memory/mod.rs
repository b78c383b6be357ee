// Semantic memory
// Pairs an embedder with a vector store: text in, text out


use std::sync::Arc;
use tracing::debug;

use crate::database::{Existence, QueryResult, StoredItem, VectorStore};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

#[derive(Clone)]
pub struct SemanticMemory {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl SemanticMemory {
    #[inline]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    #[inline]
    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    #[inline]
    pub async fn exists(&self, collection: &str, id: &str) -> Existence {
        self.store.lookup(collection, id).await
    }

    /// Embed `text` and upsert it under `id`
    #[inline]
    pub async fn save_information(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        description: &str,
    ) -> Result<()> {
        let embedding = self.embedder.embed(text).await?;

        let item = StoredItem {
            id: id.to_string(),
            embedding,
            text: text.to_string(),
            description: description.to_string(),
            additional_metadata: String::new(),
        };
        self.store.upsert(collection, item).await
    }

    /// Embed the query and return up to `limit` results, most relevant first
    #[inline]
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<QueryResult>> {
        let embedding = self.embedder.embed(query).await?;
        let mut results = self.store.search(collection, &embedding, limit).await?;

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        results.truncate(limit);

        debug!("Memory search returned {} results", results.len());
        Ok(results)
    }

    /// The single most relevant result, or [`RagError::NoMatchFound`]
    #[inline]
    pub async fn top_match(&self, collection: &str, query: &str) -> Result<QueryResult> {
        self.top_match_within(collection, query, 1).await
    }

    /// Best of the first `candidates` results, or [`RagError::NoMatchFound`]
    #[inline]
    pub async fn top_match_within(
        &self,
        collection: &str,
        query: &str,
        candidates: usize,
    ) -> Result<QueryResult> {
        self.search(collection, query, candidates.max(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::NoMatchFound(query.to_string()))
    }
}
