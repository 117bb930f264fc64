//! The LLM capability interface and the retry/backoff helper every
//! concrete [`LlmPort`] implementation (e.g. `pipeline-anthropic`) shares.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct LlmCallOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub tokens_used: u64,
}

/// `call(prompt, agent_name, options) -> (text, tokens)`. Stateless and
/// safe for concurrent use: no implementation should hold per-call mutable
/// state, only a shared HTTP client and per-agent model/credential config
/// resolved up front.
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn call(
        &self,
        prompt: &str,
        agent_name: &str,
        options: LlmCallOptions,
    ) -> Result<LlmResponse>;
}

/// Character-heuristic fallback for when a provider does not report token
/// usage, so telemetry is always non-zero. Roughly 4 characters per token,
/// the same ballpark heuristic providers themselves publish.
pub fn heuristic_token_count(prompt: &str, completion: &str) -> u64 {
    ((prompt.len() + completion.len()) as u64 / 4).max(1)
}

/// Retries `attempt` up to `max_retries` additional times on a transient
/// failure, with exponential backoff plus jitter. `attempt` should map
/// provider rate-limit signals to [`Error::LlmUnavailable`] so this helper
/// never needs to know about provider-specific status codes.
pub async fn call_with_retry<F, Fut>(max_retries: u32, mut attempt: F) -> Result<LlmResponse>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<LlmResponse>>,
{
    let mut last_err = None;
    for try_num in 0..=max_retries {
        match attempt().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                tracing::warn!(try_num, error = %err, "LLM call failed, retrying");
                last_err = Some(err);
                if try_num < max_retries {
                    let backoff_ms = 100u64 * 2u64.pow(try_num);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::LlmUnavailable("exhausted retries".into())))
}
