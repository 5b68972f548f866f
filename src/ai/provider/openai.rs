//! OpenAI-Compatible Provider
//!
//! Chat Completions client. Works with any endpoint speaking the same
//! request/response shape.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Completion, CompletionProvider, CompletionRequest, TokenUsage};
use crate::config::{API_KEY_ENV, LlmConfig};
use crate::types::{RelayError, Result};

/// OpenAI API provider with secure API key handling
pub struct OpenAiProvider {
    /// Never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    /// Fails with `Configuration` when no API key is configured
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                RelayError::config(format!(
                    "API key not found. Set {} or llm.api_key in config",
                    API_KEY_ENV
                ))
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RelayError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key.to_string()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let start_time = Instant::now();
        let body = self.build_request(request);

        debug!(model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::api(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::from_http_status(
                status.as_u16(),
                &text,
                retry_after,
            ));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| RelayError::api(format!("Failed to parse response: {}", e)))?;

        let completion = parsed.into_completion()?;
        debug!(
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Completion received"
        );
        Ok(completion)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Delay-seconds form only; HTTP-date values are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

impl ChatCompletionResponse {
    fn into_completion(self) -> Result<Completion> {
        let usage = self
            .usage
            .map(|u| TokenUsage::from_openai(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RelayError::api("No content in completion response"))?;

        Ok(Completion { content, usage })
    }
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}
