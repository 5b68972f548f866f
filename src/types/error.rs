//! Unified Error Type System
//!
//! Centralized error types for the orchestrator and its CLI.
//!
//! ## Propagation
//!
//! - Per-chunk failures never reach the caller; they become failed chunk results
//! - A single-request failure, a total chunk failure, or a configuration problem
//!   is surfaced as one of the variants below
//! - Cache problems degrade to a miss and are never surfaced

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Setup Errors
    // -------------------------------------------------------------------------
    /// Missing credential or invalid configuration value. Fatal at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // -------------------------------------------------------------------------
    // Remote Errors
    // -------------------------------------------------------------------------
    /// The completion service refused the request because of throttling
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other remote failure: non-2xx status, transport error, malformed body
    #[error("{}", api_message(.status, .message))]
    Api { status: Option<u16>, message: String },

    // -------------------------------------------------------------------------
    // Orchestration Errors
    // -------------------------------------------------------------------------
    /// A response expected to be JSON was not
    #[error("Parse error: {0}")]
    Parse(String),

    /// Every chunk of a multi-chunk request failed
    #[error("All {chunks} chunks failed (last error: {last_error})")]
    AllChunksFailed { chunks: usize, last_error: String },

    /// The queue's dispatcher task stopped before delivering a result
    #[error("Request dispatcher stopped before delivering a result")]
    DispatcherStopped,

    /// Caller-side deadline elapsed
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },
}

fn api_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("API error ({}): {}", code, message),
        None => format!("API error: {}", message),
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl RelayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an API error without a status code (transport, body shape)
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Map a non-2xx HTTP response to the error taxonomy.
    ///
    /// 429 always means throttling. Some gateways answer throttling with another
    /// status but name it in the body (`rate_limit_exceeded`), so the body is
    /// checked too.
    pub fn from_http_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let lower = body.to_lowercase();
        let throttled = status == 429
            || lower.contains("rate_limit_exceeded")
            || lower.contains("rate limit exceeded");

        if throttled {
            Self::RateLimitExceeded {
                message: summarize_body(body),
                retry_after,
            }
        } else {
            Self::Api {
                status: Some(status),
                message: summarize_body(body),
            }
        }
    }

    /// Whether a caller may reasonably retry the same request later
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::DispatcherStopped | Self::Timeout { .. } => {
                true
            }
            Self::Api { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            Self::AllChunksFailed { .. } => true,
            _ => false,
        }
    }

    /// Suggested wait before retrying, when the service provided one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Extract the human-readable message from an OpenAI-style error body
fn summarize_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

// =============================================================================
// Tests
// =============================================================================
