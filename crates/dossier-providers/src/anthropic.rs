//! Messages-API completion client.
//!
//! Backs the [`CompletionService`] seam used for screening, relevance,
//! scoring and batch extraction. Each call is a single user turn under a
//! system prompt; the reply is the first text block of the response.

use std::time::Duration;

use async_trait::async_trait;
use dossier_core::{CompletionOptions, CompletionService, ServiceError, ServiceResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{transport_error, ProviderResult};
use crate::http::{build_client, endpoint, ensure_success, parsed, required};

const SERVICE: &str = "completion";

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_VERSION: &str = "2023-06-01";

/// Completion client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Whole-request timeout; extraction calls can generate 16k tokens.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl AnthropicConfig {
    pub fn new(api_key: &str) -> Self {
        AnthropicConfig {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 600,
            connect_timeout_secs: 10,
        }
    }

    /// `ANTHROPIC_API_KEY` (required), `ANTHROPIC_MODEL`, `ANTHROPIC_BASE_URL`,
    /// `ANTHROPIC_TIMEOUT_SECS`.
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> ProviderResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(&required(&lookup, SERVICE, "ANTHROPIC_API_KEY")?);
        if let Some(model) = lookup("ANTHROPIC_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = lookup("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = parsed(&lookup, SERVICE, "ANTHROPIC_TIMEOUT_SECS")? {
            config.timeout_secs = secs;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [Message<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl MessagesResponse {
    fn first_text(self) -> ServiceResult<String> {
        self.content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| ServiceError::invalid_response(SERVICE, "no text content in response"))
    }
}

/// Completion client over the messages API
pub struct AnthropicClient {
    config: AnthropicConfig,
    http_client: Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        let http_client = build_client(Duration::from_secs(config.connect_timeout_secs))?;
        Ok(AnthropicClient { config, http_client })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(AnthropicConfig::from_env()?)
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }
}

#[async_trait]
impl CompletionService for AnthropicClient {
    #[instrument(skip_all, fields(model = %self.config.model, max_tokens = options.max_tokens))]
    async fn complete(&self, system: &str, user: &str, options: &CompletionOptions) -> ServiceResult<String> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: options.max_tokens,
            system,
            messages: [Message {
                role: "user",
                content: user,
            }],
            temperature: options.temperature,
        };
        let timeout = self.config.timeout();

        let response = self
            .http_client
            .post(endpoint(&self.config.base_url, "/v1/messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, &e, timeout))?;
        let response = ensure_success(SERVICE, response).await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| transport_error(SERVICE, &e, timeout))?;
        debug!(stop_reason = ?parsed.stop_reason, "completion received");
        parsed.first_text()
    }
}
