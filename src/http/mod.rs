// HTTP plumbing shared by the Azure OpenAI clients
// Bounded timeouts and retry with exponential backoff for transient failures


use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::OpenAiConfig;
use crate::{RagError, Result};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_millis(1000);

/// Authenticated client for one Azure OpenAI resource
#[derive(Debug, Clone)]
pub struct AzureHttpClient {
    base_url: Url,
    api_version: String,
    api_key: SecretString,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
    service: &'static str,
}

impl AzureHttpClient {
    /// Client whose every call, body included, is bounded by the configured timeout
    #[inline]
    pub fn new(
        config: &OpenAiConfig,
        api_key: SecretString,
        service: &'static str,
    ) -> Result<Self> {
        let base_url = config
            .endpoint_url()
            .map_err(|e| RagError::Config(e.to_string()))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_version: config.api_version.clone(),
            api_key,
            agent,
            retry_attempts: config.retry_attempts,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            service,
        })
    }

    /// Client for streamed responses: the timeout bounds the wait for the
    /// response headers and for each body read, not the whole stream
    #[inline]
    pub fn new_streaming(
        config: &OpenAiConfig,
        api_key: SecretString,
        service: &'static str,
    ) -> Result<Self> {
        let mut client = Self::new(config, api_key, service)?;
        let timeout = Duration::from_secs(config.timeout_secs);
        client.agent = ureq::Agent::config_builder()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout))
            .build()
            .into();
        Ok(client)
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay of the exponential backoff between retries
    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// `{endpoint}/openai/deployments/{deployment}/{operation}?api-version=...`
    #[inline]
    pub fn deployment_url(&self, deployment: &str, operation: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RagError::Config(format!("Endpoint cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(["openai", "deployments", deployment])
            .extend(operation.split('/'));
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    /// POST a JSON body and read the whole response as text
    #[inline]
    pub fn post_json(&self, url: &Url, body: &str) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("api-key", self.api_key.expose_secret().as_str())
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    /// POST a JSON body and hand back the open response for incremental reading.
    /// Only establishing the response is retried.
    #[inline]
    pub fn post_json_streaming(&self, url: &Url, body: &str) -> Result<ureq::BodyReader<'static>> {
        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Accept", "text/event-stream")
                .header("api-key", self.api_key.expose_secret().as_str())
                .send(body)
                .map(|resp| resp.into_body().into_reader())
        })
    }

    fn make_request_with_retry<T, F>(&self, mut request_fn: F) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "{} request attempt {}/{}",
                self.service, attempt, self.retry_attempts
            );

            match request_fn() {
                Ok(value) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(value);
                }
                Err(error) => {
                    let failure = classify(self.service, &error);
                    if !failure.is_transient() {
                        warn!("Non-retryable error from {}: {}", self.service, error);
                        return Err(failure);
                    }

                    warn!(
                        "Transient error from {}: {}, attempt {}/{}",
                        self.service, error, attempt, self.retry_attempts
                    );
                    last_error = Some(failure);

                    if attempt < self.retry_attempts {
                        let delay = self.backoff_unit * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!(
            "All retry attempts failed for {} at {}",
            self.service, self.base_url
        );

        Err(last_error.unwrap_or_else(|| RagError::TransientService {
            service: self.service,
            message: "Request failed after retries".to_string(),
        }))
    }
}

/// Rate limits, server errors and transport failures are worth retrying;
/// everything else is reported as is
pub(crate) fn classify(service: &'static str, error: &ureq::Error) -> RagError {
    match error {
        ureq::Error::StatusCode(status) if *status == 429 || *status >= 500 => {
            RagError::TransientService {
                service,
                message: format!("HTTP {}", status),
            }
        }
        ureq::Error::StatusCode(status) => RagError::Service {
            service,
            message: format!("Client error: HTTP {}", status),
        },
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => RagError::TransientService {
            service,
            message: error.to_string(),
        },
        _ => RagError::Service {
            service,
            message: error.to_string(),
        },
    }
}
