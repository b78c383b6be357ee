// Chat completion module
// Streaming completion capability and the Azure OpenAI implementation

pub mod azure;
pub mod stream;

use crate::Result;
use crate::config::ChatConfig;

pub use azure::AzureOpenAiChat;
pub use stream::{FragmentStream, SseFragments};

/// Sampling parameters sent with every completion request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl From<&ChatConfig> for ModelParams {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        }
    }
}

impl Default for ModelParams {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

/// Produces a completion for a prompt as a stream of text fragments.
///
/// The returned stream is finite and can be consumed once; fragments arrive
/// as the remote model produces them.
pub trait ChatCompleter: Send + Sync {
    fn complete_stream(&self, prompt: &str, params: &ModelParams) -> Result<FragmentStream>;
}
