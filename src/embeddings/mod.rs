// Embeddings module
// Embedder capability and the Azure OpenAI implementation

pub mod azure;

use async_trait::async_trait;

use crate::Result;

pub use azure::AzureOpenAiEmbedder;

/// Turns text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns
    fn dimension(&self) -> usize;
}
