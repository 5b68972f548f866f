//! AI Integration Layer
//!
//! Token estimation, chunking, rate-limited dispatch, caching and result
//! combination for completion requests.

pub mod cache;
pub mod chunking;
pub mod combiner;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod timeout;
pub mod tokenizer;

pub use cache::{CacheEntry, CacheStats, ResponseCache, SharedCache};
pub use chunking::{ChunkingEngine, RecordPayload, find_record_payload};
pub use combiner::{Combined, ResultCombiner, parse_json_content, strip_json_wrapping};
pub use metrics::{MetricsCollector, MetricsSummary, SharedMetrics, create_shared_metrics};
pub use orchestrator::{
    CompletionReport, DispatchPlan, PlanStrategy, RequestOrchestrator, plan_dispatch,
};
pub use progress::{ProgressChannel, ProgressEvent};
pub use prompt::{ChunkPosition, chunk_system_prompt};
pub use provider::{
    Completion, CompletionProvider, CompletionRequest, OpenAiProvider, SharedProvider, TokenUsage,
};
pub use queue::{QueueStats, RateLimitedQueue, RateWindow, SharedQueue};
pub use timeout::{with_optional_timeout, with_timeout};
pub use tokenizer::{TokenEstimator, estimate_tokens};
