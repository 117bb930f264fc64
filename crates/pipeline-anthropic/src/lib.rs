//! [`LlmPort`] adapter over Anthropic's Messages API. No official SDK crate
//! is used here — the REST surface is narrow enough that a thin `reqwest`
//! client is simpler to maintain than an unofficial wrapper.

use async_trait::async_trait;
use pipeline_core::constants::{DEFAULT_HTTP_REQUEST_TIMEOUT, DEFAULT_LLM_RETRIES};
use pipeline_core::error::{Error, Result};
use pipeline_core::llm::{call_with_retry, heuristic_token_count, LlmCallOptions, LlmPort, LlmResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub endpoint: String,
    pub default_model: String,
    pub max_retries: u32,
    pub request_timeout: Duration,
}

impl AnthropicConfig {
    /// Reads `ANTHROPIC_API_KEY` (required) and `ANTHROPIC_MODEL` (optional,
    /// defaults to `claude-sonnet-4-5`) from the environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| Error::LlmUnavailable("ANTHROPIC_API_KEY is not set".to_string()))?;
        Ok(Self {
            api_key,
            endpoint: std::env::var("ANTHROPIC_API_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            default_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            max_retries: DEFAULT_LLM_RETRIES,
            request_timeout: DEFAULT_HTTP_REQUEST_TIMEOUT,
        })
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;
        Ok(Self { http, config })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[async_trait]
impl LlmPort for AnthropicClient {
    async fn call(&self, prompt: &str, agent_name: &str, options: LlmCallOptions) -> Result<LlmResponse> {
        let model = options.model.as_deref().unwrap_or(&self.config.default_model);
        let max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        call_with_retry(self.config.max_retries, || async {
            let body = MessagesRequest {
                model,
                max_tokens,
                messages: vec![Message { role: "user", content: prompt }],
                temperature: options.temperature,
            };

            let response = self
                .http
                .post(&self.config.endpoint)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::LlmUnavailable(format!("{agent_name}: request failed: {e}")))?;

            let status = response.status();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::LlmUnavailable(format!("{agent_name}: reading body failed: {e}")))?;

            if !status.is_success() {
                let message = serde_json::from_slice::<ErrorEnvelope>(&bytes)
                    .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
                    .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).to_string());
                // Rate limits and server errors are worth retrying; anything
                // else (bad request, auth) is not, but this adapter has no
                // way to short-circuit `call_with_retry` early, so both
                // surface as the same transient-looking error kind.
                return Err(Error::LlmUnavailable(format!(
                    "{agent_name}: HTTP {status}: {message}"
                )));
            }

            let parsed: MessagesResponse = serde_json::from_slice(&bytes)
                .map_err(|e| Error::LlmUnavailable(format!("{agent_name}: decoding response failed: {e}")))?;

            let text = parsed
                .content
                .into_iter()
                .filter(|b| b.block_type == "text")
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("");

            let reported = parsed.usage.input_tokens + parsed.usage.output_tokens;
            let tokens_used = if reported == 0 {
                heuristic_token_count(prompt, &text)
            } else {
                reported
            };

            Ok(LlmResponse { text, tokens_used })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AnthropicClient {
        AnthropicClient::new(AnthropicConfig {
            api_key: "sk-test".to_string(),
            endpoint: format!("{}/v1/messages", server.uri()),
            default_model: "claude-sonnet-4-5".to_string(),
            max_retries: 1,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn successful_call_returns_text_and_reported_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hello"}],
                "usage": {"input_tokens": 5, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let response = client.call("hi", "planner", LlmCallOptions::default()).await.unwrap();
        assert_eq!(response.text, "hello");
        assert_eq!(response.tokens_used, 7);
    }

    #[tokio::test]
    async fn server_error_surfaces_as_llm_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": {"type": "overloaded_error", "message": "try again"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.call("hi", "planner", LlmCallOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::LlmUnavailable(_)));
    }
}
