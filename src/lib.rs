//! RankRelay - Rate-Limited LLM Request Orchestrator
//!
//! Sends analysis prompts built from search-performance data to an
//! OpenAI-compatible completion service without exceeding its input or rate
//! limits.
//!
//! ## Core Features
//!
//! - **Chunking**: oversized prompts are split by record batch or along text
//!   boundaries, each chunk annotated with its position
//! - **Rate Limiting**: every outbound call passes one FIFO dispatcher that
//!   caps requests per rolling window
//! - **Caching**: identical prompts are answered from an in-memory TTL cache
//! - **Combination**: chunked answers merge back into one JSON document or text
//!
//! ## Quick Start
//!
//! ```ignore
//! use rankrelay::{ConfigLoader, ReportKind, RequestOrchestrator};
//!
//! let config = ConfigLoader::load()?;
//! let orchestrator = RequestOrchestrator::from_config(&config)?;
//! let report = orchestrator
//!     .complete(system_prompt, &user_prompt, ReportKind::RecordList, true)
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: estimation, chunking, queue, cache, combination, orchestration
//! - [`config`]: layered configuration
//! - [`types`]: request/chunk types and the error taxonomy

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{RelayError, Result};

// Request Types
pub use types::{Chunk, ChunkResult, PromptRequest, ReportKind};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    // Orchestration
    CompletionReport,
    // Providers
    CompletionProvider,
    MetricsCollector,
    OpenAiProvider,
    ProgressEvent,
    RequestOrchestrator,
    ResponseCache,
    // Building blocks
    ChunkingEngine,
    RateLimitedQueue,
    ResultCombiner,
    TokenEstimator,
    // Timeout
    with_timeout,
};
