//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/rankrelay/) and project (.rankrelay/) level configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{cache, chunking, network, rate_limit};
use crate::types::{RelayError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Completion service settings
    pub llm: LlmConfig,

    /// Outbound request throttling
    pub rate_limit: RateLimitConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Prompt splitting settings
    pub chunking: ChunkingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `RelayError::Configuration` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(RelayError::config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(RelayError::config(
                "LLM timeout_secs must be greater than 0",
            ));
        }

        if self.llm.max_tokens == 0 || self.llm.max_input_tokens == 0 {
            return Err(RelayError::config(
                "LLM max_tokens and max_input_tokens must be greater than 0",
            ));
        }

        url::Url::parse(&self.llm.api_base).map_err(|e| {
            RelayError::config(format!("Invalid api_base '{}': {}", self.llm.api_base, e))
        })?;

        if self.rate_limit.requests_per_minute == 0 {
            return Err(RelayError::config(
                "rate_limit.requests_per_minute must be greater than 0",
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(RelayError::config(
                "rate_limit.window_secs must be greater than 0",
            ));
        }

        if !(self.chunking.budget_ratio > 0.0 && self.chunking.budget_ratio <= 1.0) {
            return Err(RelayError::config(format!(
                "chunking.budget_ratio must be in (0.0, 1.0], got {}",
                self.chunking.budget_ratio
            )));
        }

        Ok(())
    }

    /// Maximum estimated tokens a single request (or chunk) may carry
    pub fn chunk_token_budget(&self) -> usize {
        ((self.llm.max_input_tokens as f64 * self.chunking.budget_ratio).floor() as usize).max(1)
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Completion service configuration
///
/// The API key is never serialized to output and is redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key; falls back to OPENAI_API_KEY
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// OpenAI-compatible API base URL
    pub api_base: String,

    /// Model identifier
    pub model: String,

    /// Maximum tokens to generate per request
    pub max_tokens: usize,

    /// Sampling temperature
    pub temperature: f32,

    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Per-request input-token ceiling of the service
    pub max_input_tokens: usize,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_input_tokens", &self.max_input_tokens)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: network::DEFAULT_API_BASE.to_string(),
            model: network::DEFAULT_MODEL.to_string(),
            max_tokens: network::DEFAULT_MAX_TOKENS,
            temperature: network::DEFAULT_TEMPERATURE,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            max_input_tokens: chunking::DEFAULT_MAX_INPUT_TOKENS,
        }
    }
}

// =============================================================================
// Rate Limit Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum dispatches per window
    pub requests_per_minute: u32,

    /// Window length in seconds
    pub window_secs: u64,

    /// Delay after every dispatch in milliseconds
    pub min_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: rate_limit::DEFAULT_REQUESTS_PER_MINUTE,
            window_secs: rate_limit::WINDOW_SECS,
            min_interval_ms: rate_limit::MIN_INTERVAL_MS,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

// =============================================================================
// Cache Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default for requests that don't specify otherwise (CLI)
    pub enabled: bool,

    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: cache::TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

// =============================================================================
// Chunking Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Share of `llm.max_input_tokens` one chunk may use
    pub budget_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            budget_ratio: chunking::DEFAULT_BUDGET_RATIO,
        }
    }
}
