//! Language-model service boundary.
//!
//! A [`LanguageModel`] turns a [`CompletionRequest`] (system instructions,
//! prompt, temperature, stop sequences) into generated text. Two callers
//! use it: the reasoning loop (low temperature, stop before `Observation:`)
//! and the query engine's single synthesis call.
//!
//! Every call site goes through [`complete_with_timeout`], so a stalled
//! service can never hold the bounded reasoning loop open indefinitely,
//! whatever the backend's own client settings are.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System instructions; omitted from the wire request when empty.
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    /// Generation stops before any of these sequences.
    pub stop: Vec<String>,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo"`).
    fn model_name(&self) -> &str;

    /// Generate text for the request.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Whether the service is reachable. Checked once when the reasoning
    /// agent is constructed.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Run `model.complete` under a hard deadline.
pub async fn complete_with_timeout(
    model: &dyn LanguageModel,
    request: &CompletionRequest,
    timeout_secs: u64,
) -> Result<String> {
    match tokio::time::timeout(Duration::from_secs(timeout_secs), model.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: "language model completion",
            secs: timeout_secs,
        }),
    }
}

// ============ Disabled Model ============

/// Stand-in used when no language model is configured or it could not be
/// created. Every completion fails and the health check reports down.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(Error::Llm("Language model is disabled".to_string()))
    }

    async fn health_check(&self) -> bool {
        false
    }
}

// ============ OpenAI Chat Model ============

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAIChatModel {
    /// Create a client from configuration, reading `OPENAI_API_KEY` (and
    /// optionally `OPENAI_BASE_URL`) from the environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Llm("OPENAI_API_KEY environment variable not set".into()))?;
        let mut config = config.clone();
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        Self::with_api_key(&config, api_key)
    }

    /// Create a client with an explicit API key.
    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Llm(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Initializing chat model: url={}, model={}",
            config.base_url, config.model
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: request.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.prompt.clone(),
        });

        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            stop: request.stop.clone(),
        };
        let url = format!("{}/chat/completions", self.base_url);

        debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            "Requesting completion"
        );

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, attempt, "Completion request failed");
                    last_err = Some(Error::Llm(format!("Request failed: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::Llm(format!("Failed to parse response: {}", e)))?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                debug!(response_len = content.len(), "Completion finished");
                return Ok(content);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                warn!(%status, attempt, "Completion API transient error");
                last_err = Some(Error::Llm(format!("API error {}: {}", status, body_text)));
                continue;
            }
            return Err(Error::Llm(format!("API error {}: {}", status, body_text)));
        }

        Err(last_err.unwrap_or_else(|| Error::Llm("Completion failed after retries".to_string())))
    }

    async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("Language model health check failed: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Language model health check error: {}", e);
                false
            }
        }
    }
}

/// Create the configured language model.
///
/// | Config Value | Model |
/// |-------------|-------|
/// | `"disabled"` | error: there is no model to run |
/// | `"openai"` | [`OpenAIChatModel`] |
pub fn create_language_model(config: &LlmConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIChatModel::new(config)?)),
        "disabled" => Err(Error::Llm("Language model provider is disabled".to_string())),
        other => Err(Error::InvalidInput(format!("Unknown llm provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        fn model_name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("too late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_stalled_model() {
        let err = complete_with_timeout(&SlowModel, &CompletionRequest::default(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { secs: 5, .. }));
    }

    #[tokio::test]
    async fn test_disabled_model() {
        assert!(!DisabledModel.health_check().await);
        assert!(DisabledModel
            .complete(&CompletionRequest::default())
            .await
            .is_err());
    }

    #[test]
    fn test_create_disabled_is_error() {
        let config = LlmConfig::default();
        assert!(create_language_model(&config).is_err());
    }

    #[test]
    fn test_request_serialization_skips_empty_stop() {
        let body = ChatCompletionRequest {
            model: "gpt-3.5-turbo",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi".to_string(),
            }],
            temperature: 0.1,
            stop: vec![],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
