
use secrecy::SecretString;
use serde::Serialize;
use std::io::BufReader;
use tracing::debug;

use super::{ChatCompleter, FragmentStream, ModelParams, SseFragments};
use crate::config::Config;
use crate::http::AzureHttpClient;
use crate::{RagError, Result};

const SERVICE: &str = "chat service";

/// Azure OpenAI chat completions deployment, always used in streaming mode
#[derive(Debug, Clone)]
pub struct AzureOpenAiChat {
    http: AzureHttpClient,
    deployment: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl AzureOpenAiChat {
    #[inline]
    pub fn new(config: &Config, api_key: SecretString) -> Result<Self> {
        let http = AzureHttpClient::new_streaming(&config.openai, api_key, SERVICE)?;

        Ok(Self {
            http,
            deployment: config.openai.chat_deployment.clone(),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.http = self.http.with_retry_attempts(attempts);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: std::time::Duration) -> Self {
        self.http = self.http.with_backoff_unit(unit);
        self
    }

    fn request_body(prompt: &str, params: &ModelParams) -> Result<String> {
        let request = ChatRequest {
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream: true,
        };
        serde_json::to_string(&request).map_err(|e| RagError::Other(e.into()))
    }
}

impl ChatCompleter for AzureOpenAiChat {
    fn complete_stream(&self, prompt: &str, params: &ModelParams) -> Result<FragmentStream> {
        debug!(
            "Requesting streamed completion (prompt length: {}, max_tokens: {})",
            prompt.len(),
            params.max_tokens
        );

        let url = self.http.deployment_url(&self.deployment, "chat/completions")?;
        let body = Self::request_body(prompt, params)?;
        let reader = self.http.post_json_streaming(&url, &body)?;

        Ok(Box::new(SseFragments::new(BufReader::new(reader))))
    }
}
