//! Completion Provider Abstraction
//!
//! Defines the `CompletionProvider` trait the orchestrator dispatches through.
//! The production implementation talks to an OpenAI-compatible Chat
//! Completions endpoint; tests substitute scripted providers.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::Result;

// =============================================================================
// Request / Response
// =============================================================================

/// One outbound completion call: a system and a user message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

/// Completion text plus reported usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

impl Completion {
    /// Completion without usage information
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
        }
    }
}

/// Token usage as reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Create from OpenAI-style usage response
    pub fn from_openai(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

/// Remote text-completion service
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform one completion call. Non-2xx answers map to
    /// `RateLimitExceeded` or `Api`.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Shared provider type
pub type SharedProvider = Arc<dyn CompletionProvider + Send + Sync>;
