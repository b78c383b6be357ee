// Test doubles shared by the unit tests

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::chat::{ChatCompleter, FragmentStream, ModelParams};
use crate::database::{Existence, InMemoryStore, QueryResult, StoredItem, VectorStore};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// One vector component per keyword, set when the text mentions it, plus a
/// constant bias component so no vector is zero
pub struct KeywordEmbedder {
    keywords: Vec<&'static str>,
    pub calls: AtomicUsize,
    fail_on: Option<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&'static str]) -> Self {
        Self {
            keywords: keywords.to_vec(),
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    /// Fail every call whose text contains `marker`
    pub fn failing_on(mut self, marker: &'static str) -> Self {
        self.fail_on = Some(marker);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_on.is_some_and(|marker| text.contains(marker)) {
            return Err(RagError::Service {
                service: "embeddings",
                message: "rejected".to_string(),
            });
        }

        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .keywords
            .iter()
            .map(|keyword| if lower.contains(keyword) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.keywords.len() + 1
    }
}

/// In-memory store wrapper with injectable failures and call counters
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub failing_lookups: Vec<&'static str>,
    pub failing_upserts: Vec<&'static str>,
    pub searches: AtomicUsize,
}

impl FlakyStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: InMemoryStore::new(dimension),
            failing_lookups: Vec::new(),
            failing_upserts: Vec::new(),
            searches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn prepare(&self, collection: &str) -> Result<()> {
        self.inner.prepare(collection).await
    }

    async fn lookup(&self, collection: &str, id: &str) -> Existence {
        if self.failing_lookups.contains(&id) {
            return Existence::CheckFailed("connection reset".to_string());
        }
        self.inner.lookup(collection, id).await
    }

    async fn upsert(&self, collection: &str, item: StoredItem) -> Result<()> {
        if self.failing_upserts.contains(&item.id.as_str()) {
            return Err(RagError::Database(format!("write rejected for {}", item.id)));
        }
        self.inner.upsert(collection, item).await
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<QueryResult>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(collection, embedding, limit).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection).await
    }
}

/// Replays a fixed list of fragments and records every prompt it receives
#[derive(Default)]
pub struct ScriptedChat {
    pub fragments: Vec<&'static str>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn new(fragments: &[&'static str]) -> Self {
        Self {
            fragments: fragments.to_vec(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log").clone()
    }
}

impl ChatCompleter for ScriptedChat {
    fn complete_stream(&self, prompt: &str, _params: &ModelParams) -> Result<FragmentStream> {
        self.prompts.lock().expect("prompt log").push(prompt.to_string());
        let fragments: Vec<Result<String>> = self
            .fragments
            .iter()
            .map(|fragment| Ok((*fragment).to_string()))
            .collect();
        Ok(Box::new(fragments.into_iter()))
    }
}
