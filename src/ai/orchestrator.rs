//! Request Orchestrator
//!
//! Single entry point for report generation. Decides whether a prompt fits in
//! one request or must be split, pushes every outbound call through the shared
//! rate-limited queue, and recombines chunked answers.
//!
//! ## Flow
//!
//! ```text
//! cache hit? ──yes──> return cached
//!     │ no
//! plan: fits budget? ──yes──> one dispatch ──> cache ──> return
//!     │ no
//! split (records or free text) ──> dispatch chunks one by one
//!     ──> combine ──> cache ──> return
//! ```
//!
//! Chunks of one request are submitted strictly in sequence. A failed chunk
//! becomes a placeholder result; only a failed single request or a request
//! whose every chunk failed is an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ai::cache::{ResponseCache, SharedCache};
use crate::ai::chunking::{ChunkingEngine, RecordPayload, find_record_payload};
use crate::ai::combiner::{ResultCombiner, parse_json_content};
use crate::ai::metrics::{SharedMetrics, create_shared_metrics};
use crate::ai::progress::{ProgressChannel, ProgressEvent};
use crate::ai::prompt::chunk_system_prompt;
use crate::ai::provider::{
    Completion, CompletionRequest, OpenAiProvider, SharedProvider, TokenUsage,
};
use crate::ai::queue::{RateLimitedQueue, SharedQueue};
use crate::ai::tokenizer::TokenEstimator;
use crate::config::Config;
use crate::constants::chunking as chunk_constants;
use crate::types::{Chunk, ChunkResult, PromptRequest, ReportKind, Result};

// =============================================================================
// Plan
// =============================================================================

/// How a request will be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanStrategy {
    /// Fits the budget, sent as-is
    Single,
    /// Split along sentence, paragraph, line and word boundaries
    FreeText,
    /// Embedded record array split into batches
    Records,
}

/// Chunks a request will be sent as, before any network activity
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPlan {
    pub strategy: PlanStrategy,
    /// Estimated tokens of system + user prompt
    pub estimated_tokens: usize,
    pub budget: usize,
    pub chunks: Vec<Chunk>,
}

impl DispatchPlan {
    pub fn is_chunked(&self) -> bool {
        self.strategy != PlanStrategy::Single
    }
}

/// Decide how a prompt would be dispatched under `chunker`'s budget.
///
/// Prompts over budget that embed a JSON array of records are split by
/// record, keeping the surrounding text on every batch. When that text alone
/// takes more than its share of the budget, or there are no records, the
/// prompt is split as free text.
pub fn plan_dispatch(
    chunker: &ChunkingEngine,
    system_prompt: &str,
    user_prompt: &str,
) -> DispatchPlan {
    let estimator = chunker.estimator();
    let budget = chunker.max_tokens_per_chunk();
    let estimated_tokens = estimator.estimate(system_prompt) + estimator.estimate(user_prompt);

    if estimated_tokens <= budget {
        return DispatchPlan {
            strategy: PlanStrategy::Single,
            estimated_tokens,
            budget,
            chunks: vec![Chunk {
                index: 0,
                content: user_prompt.to_string(),
                estimated_tokens: estimator.estimate(user_prompt),
            }],
        };
    }

    let max_framing = (budget as f64 * chunk_constants::MAX_RECORD_FRAMING_RATIO) as usize;
    let payload = find_record_payload(user_prompt).filter(|payload| {
        let fits = record_framing(estimator, payload) <= max_framing;
        if !fits {
            debug!(budget, "Text around records is too large, splitting as free text");
        }
        fits
    });

    if let Some(payload) = payload {
        let framing = record_framing(estimator, &payload);
        let batcher = ChunkingEngine::with_estimator(budget.saturating_sub(framing), *estimator);

        let chunks = batcher
            .split_records(&payload.records, "")
            .into_iter()
            .map(|chunk| {
                let prefix = if chunk.index == 0 {
                    ""
                } else {
                    chunk_constants::RECORDS_CONTEXT_PREFIX
                };
                let content =
                    format!("{}{}{}{}", prefix, payload.lead, chunk.content, payload.tail);
                Chunk {
                    index: chunk.index,
                    estimated_tokens: estimator.estimate(&content),
                    content,
                }
            })
            .collect();

        return DispatchPlan {
            strategy: PlanStrategy::Records,
            estimated_tokens,
            budget,
            chunks,
        };
    }

    let mut chunks = chunker.split_text(user_prompt, chunk_constants::TEXT_CONTEXT_PREFIX);
    if chunks.is_empty() {
        // Only the system prompt is over budget; the user prompt still goes out once
        chunks.push(Chunk {
            index: 0,
            content: user_prompt.to_string(),
            estimated_tokens: estimator.estimate(user_prompt),
        });
    }

    DispatchPlan {
        strategy: PlanStrategy::FreeText,
        estimated_tokens,
        budget,
        chunks,
    }
}

/// Tokens every record batch spends on the text around its records
fn record_framing(estimator: &TokenEstimator, payload: &RecordPayload<'_>) -> usize {
    estimator.estimate(payload.lead)
        + estimator.estimate(payload.tail)
        + estimator.estimate(chunk_constants::RECORDS_CONTEXT_PREFIX)
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one logical request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub content: String,
    /// Per-dispatch outcomes in chunk order; empty when served from cache
    pub chunks: Vec<ChunkResult>,
    pub from_cache: bool,
}

impl CompletionReport {
    pub fn failed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.failed).count()
    }

    pub fn is_partial(&self) -> bool {
        self.failed_chunks() > 0
    }
}

// =============================================================================
// RequestOrchestrator
// =============================================================================

/// Chunking, rate-limited, caching completion front end
pub struct RequestOrchestrator {
    provider: SharedProvider,
    queue: SharedQueue,
    cache: SharedCache,
    cache_enabled: bool,
    chunker: ChunkingEngine,
    metrics: SharedMetrics,
    progress: ProgressChannel,
    next_request: AtomicU64,
}

impl std::fmt::Debug for RequestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOrchestrator")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("budget", &self.chunker.max_tokens_per_chunk())
            .field("cache_enabled", &self.cache_enabled)
            .field("queue", &self.queue)
            .finish()
    }
}

impl RequestOrchestrator {
    /// Assemble from explicit parts. `token_budget` bounds a single request
    /// and every chunk.
    pub fn new(
        provider: SharedProvider,
        queue: SharedQueue,
        cache: SharedCache,
        token_budget: usize,
    ) -> Self {
        Self {
            provider,
            queue,
            cache,
            cache_enabled: true,
            chunker: ChunkingEngine::new(token_budget),
            metrics: create_shared_metrics(),
            progress: ProgressChannel::default(),
            next_request: AtomicU64::new(0),
        }
    }

    /// Build the production stack. Fails with `Configuration` when the API
    /// key is missing or a value is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let provider: SharedProvider = Arc::new(OpenAiProvider::new(&config.llm)?);
        Ok(Self::with_provider(config, provider))
    }

    /// Production queue, cache and budget around a given provider
    pub fn with_provider(config: &Config, provider: SharedProvider) -> Self {
        Self::new(
            provider,
            RateLimitedQueue::shared(config.rate_limit.clone()),
            ResponseCache::shared(config.cache.ttl()),
            config.chunk_token_budget(),
        )
        .with_cache_enabled(config.cache.enabled)
    }

    /// Globally disable cache reads and writes, regardless of `use_cache`
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_estimator(mut self, estimator: TokenEstimator) -> Self {
        self.chunker =
            ChunkingEngine::with_estimator(self.chunker.max_tokens_per_chunk(), estimator);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_progress(mut self, progress: ProgressChannel) -> Self {
        self.progress = progress;
        self
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn token_budget(&self) -> usize {
        self.chunker.max_tokens_per_chunk()
    }

    /// Subscribe to progress events of every request made through this orchestrator
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    // -------------------------------------------------------------------------
    // Public entry points
    // -------------------------------------------------------------------------

    /// Complete a prompt, returning the (possibly combined) response text
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        kind: ReportKind,
        use_cache: bool,
    ) -> Result<String> {
        let request = PromptRequest::new(system_prompt, user_prompt, kind).with_cache(use_cache);
        self.execute(&request).await.map(|report| report.content)
    }

    /// Complete a prompt whose answer must be JSON
    pub async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        kind: ReportKind,
        use_cache: bool,
    ) -> Result<Value> {
        let content = self
            .complete(system_prompt, user_prompt, kind, use_cache)
            .await?;
        parse_json_content(&content)
    }

    /// Complete a prompt, keeping per-chunk outcomes
    pub async fn execute(&self, request: &PromptRequest) -> Result<CompletionReport> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_request();

        let outcome = self.run(request_id, request).await;
        if let Err(e) = &outcome {
            self.progress.emit(ProgressEvent::Failed {
                request_id,
                error: e.to_string(),
            });
        }
        outcome
    }

    /// Decide how a prompt would be dispatched, without dispatching it
    pub fn plan(&self, system_prompt: &str, user_prompt: &str) -> DispatchPlan {
        plan_dispatch(&self.chunker, system_prompt, user_prompt)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn run(&self, request_id: u64, request: &PromptRequest) -> Result<CompletionReport> {
        let use_cache = request.use_cache && self.cache_enabled;
        let key = ResponseCache::key_for(&request.system_prompt, &request.user_prompt);

        if use_cache {
            let cached = self.cache.get(&key);
            self.metrics.record_cache_lookup(cached.is_some());
            if let Some(content) = cached {
                info!(request_id, key = %key, "Served from cache");
                self.progress.emit(ProgressEvent::CacheHit { request_id });
                return Ok(CompletionReport {
                    content,
                    chunks: Vec::new(),
                    from_cache: true,
                });
            }
        }

        let plan = self.plan(&request.system_prompt, &request.user_prompt);
        let total = plan.chunks.len();
        self.progress.emit(ProgressEvent::Planned {
            request_id,
            chunks: total,
            estimated_tokens: plan.estimated_tokens,
        });

        let report = if plan.is_chunked() {
            info!(
                request_id,
                strategy = ?plan.strategy,
                chunks = total,
                estimated_tokens = plan.estimated_tokens,
                budget = plan.budget,
                "Request exceeds budget, splitting"
            );
            self.run_chunked(request_id, request, plan.chunks).await?
        } else {
            debug!(
                request_id,
                estimated_tokens = plan.estimated_tokens,
                "Dispatching single request"
            );
            self.run_single(request_id, request).await?
        };

        let failed_chunks = report.failed_chunks();
        self.progress.emit(ProgressEvent::Completed {
            request_id,
            chunks: report.chunks.len(),
            failed_chunks,
        });

        // Partial answers stay out of the cache so a retry can complete them
        if use_cache && failed_chunks == 0 {
            self.cache.set(key, report.content.clone());
        }

        Ok(report)
    }

    async fn run_single(&self, request_id: u64, request: &PromptRequest) -> Result<CompletionReport> {
        self.progress.emit(ProgressEvent::ChunkStarted {
            request_id,
            index: 0,
            total: 1,
        });

        let completion = self
            .dispatch(
                request.system_prompt.clone(),
                request.user_prompt.clone(),
            )
            .await?;

        self.progress.emit(ProgressEvent::ChunkFinished {
            request_id,
            index: 0,
            total: 1,
            failed: false,
        });

        let tokens = reported_or_estimated(&completion.usage, || {
            self.chunker.estimator().estimate(&request.system_prompt)
                + self.chunker.estimator().estimate(&request.user_prompt)
        });
        let result = ChunkResult::success(0, completion.content, tokens);

        Ok(CompletionReport {
            content: result.content.clone(),
            chunks: vec![result],
            from_cache: false,
        })
    }

    async fn run_chunked(
        &self,
        request_id: u64,
        request: &PromptRequest,
        chunks: Vec<Chunk>,
    ) -> Result<CompletionReport> {
        let total = chunks.len();
        self.metrics.record_chunked(total);

        let mut results = Vec::with_capacity(total);
        for chunk in chunks {
            self.progress.emit(ProgressEvent::ChunkStarted {
                request_id,
                index: chunk.index,
                total,
            });

            let system =
                chunk_system_prompt(&request.system_prompt, chunk.index, total, request.report_kind);
            let estimated = chunk.estimated_tokens;

            let result = match self.dispatch(system, chunk.content).await {
                Ok(completion) => {
                    let tokens = reported_or_estimated(&completion.usage, || estimated);
                    ChunkResult::success(chunk.index, completion.content, tokens)
                }
                Err(e) => {
                    warn!(
                        request_id,
                        chunk = chunk.index + 1,
                        total,
                        error = %e,
                        "Chunk failed, continuing with remaining chunks"
                    );
                    self.metrics.record_failed_chunk();
                    ChunkResult::failure(chunk.index, &e)
                }
            };

            self.progress.emit(ProgressEvent::ChunkFinished {
                request_id,
                index: result.index,
                total,
                failed: result.failed,
            });
            results.push(result);
        }

        let combined = ResultCombiner::new(request.report_kind).combine(&results)?;
        debug!(
            request_id,
            json = combined.is_json(),
            "Combined {} chunk results",
            results.len()
        );

        Ok(CompletionReport {
            content: combined.into_content(),
            chunks: results,
            from_cache: false,
        })
    }

    /// One outbound call through the shared queue
    async fn dispatch(&self, system_prompt: String, user_prompt: String) -> Result<Completion> {
        let provider = Arc::clone(&self.provider);
        let request = CompletionRequest::new(system_prompt, user_prompt);

        let result = self
            .queue
            .submit(move || async move { provider.complete(&request).await })
            .await;

        match &result {
            Ok(completion) => self.metrics.record_dispatch(&completion.usage),
            Err(_) => self.metrics.record_dispatch_failure(),
        }
        result
    }
}

fn reported_or_estimated(usage: &TokenUsage, estimate: impl FnOnce() -> usize) -> usize {
    match usage.total() {
        0 => estimate(),
        reported => reported as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::CompletionProvider;
    use crate::config::RateLimitConfig;
    use crate::types::RelayError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    type Responder = Box<dyn Fn(usize, &CompletionRequest) -> Result<Completion> + Send + Sync>;

    struct MockProvider {
        calls: Mutex<Vec<(CompletionRequest, Instant)>>,
        respond: Responder,
    }

    impl MockProvider {
        fn new(
            respond: impl Fn(usize, &CompletionRequest) -> Result<Completion> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn echo() -> Arc<Self> {
            Self::new(|n, _| Ok(Completion::text(format!("response {}", n))))
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }

        fn system_prompts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(r, _)| r.system_prompt.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CompletionProvider for MockProvider {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((request.clone(), Instant::now()));
                calls.len() - 1
            };
            (self.respond)(n, request)
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            "mock-model"
        }
    }

    fn orchestrator(provider: Arc<MockProvider>, budget: usize) -> RequestOrchestrator {
        orchestrator_with_limits(provider, budget, RateLimitConfig::default())
    }

    fn orchestrator_with_limits(
        provider: Arc<MockProvider>,
        budget: usize,
        limits: RateLimitConfig,
    ) -> RequestOrchestrator {
        RequestOrchestrator::new(
            provider,
            RateLimitedQueue::shared(limits),
            ResponseCache::shared(Duration::from_secs(3600)),
            budget,
        )
    }

    fn gsc_rows(count: usize) -> Value {
        Value::Array(
            (0..count)
                .map(|i| {
                    json!({
                        "query": format!("keyword {}", i),
                        "clicks": i % 17,
                        "impressions": 100 + i,
                        "position": 4.5
                    })
                })
                .collect(),
        )
    }

    fn page_records(count: usize) -> String {
        let records: Vec<Value> = (0..count)
            .map(|i| json!({"url": format!("https://example.com/{}", i), "clicks": i}))
            .collect();
        format!("Pages:\n{}\nReturn top_pages.", Value::Array(records))
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_requests_dispatch_once() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 22_400);

        let first = orch
            .complete("sys", "Analyze page X", ReportKind::InsightList, true)
            .await
            .unwrap();
        let second = orch
            .execute(&PromptRequest::new("sys", "Analyze page X", ReportKind::InsightList))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(second.content, first);
        assert!(second.from_cache);
        assert_eq!(orch.metrics().summary().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_bypass_dispatches_again() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 22_400);

        orch.complete("sys", "same", ReportKind::InsightList, false)
            .await
            .unwrap();
        orch.complete("sys", "same", ReportKind::InsightList, false)
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 2);
        assert!(orch.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_under_budget_is_one_request() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 22_400);
        let user = format!("Analyze page X\n{}", gsc_rows(500));

        let plan = orch.plan("You are an SEO analyst.", &user);
        assert_eq!(plan.strategy, PlanStrategy::Single);

        let report = orch
            .execute(&PromptRequest::new("You are an SEO analyst.", user, ReportKind::RecordList))
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.content, "response 0");
        assert_eq!(provider.system_prompts()[0], "You are an SEO analyst.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_record_list_batches_respect_spacing() {
        let provider = MockProvider::new(|n, _| {
            Ok(Completion::text(format!(r#"{{"insights":["batch {}"]}}"#, n)))
        });
        let limits = RateLimitConfig {
            requests_per_minute: 1,
            window_secs: 60,
            min_interval_ms: 1_000,
        };
        let orch = orchestrator_with_limits(Arc::clone(&provider), 22_400, limits.clone());
        let user = format!("Analyze these queries:\n{}", gsc_rows(2000));

        let report = orch
            .execute(&PromptRequest::new("sys", user, ReportKind::InsightList))
            .await
            .unwrap();

        let times = provider.call_times();
        assert!(times.len() >= 2);
        assert_eq!(report.chunks.len(), times.len());
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= limits.min_interval());
            assert!(gap >= limits.window());
        }

        let combined: Value = serde_json::from_str(&report.content).unwrap();
        assert_eq!(
            combined["insights"].as_array().unwrap().len(),
            times.len()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_batches_keep_framing_and_prefix() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 200);
        let user = page_records(60);

        let plan = orch.plan("sys", &user);
        assert_eq!(plan.strategy, PlanStrategy::Records);
        assert!(plan.chunks.len() >= 2);

        let mut seen = 0;
        for chunk in &plan.chunks {
            assert!(chunk.content.contains("Pages:\n"));
            assert!(chunk.content.ends_with("\nReturn top_pages."));
            assert_eq!(
                chunk.index > 0,
                chunk
                    .content
                    .starts_with(chunk_constants::RECORDS_CONTEXT_PREFIX)
            );
            let payload = find_record_payload(&chunk.content).unwrap();
            seen += payload.records.len();
        }
        assert_eq!(seen, 60);
    }

    #[test]
    fn test_long_text_around_small_array_splits_as_free_text() {
        let chunker = ChunkingEngine::new(1_000);
        let user = format!(
            "{}Reference rows: [{{\"url\":\"a\"}}]",
            "Traffic fell on mobile this week. ".repeat(1_000)
        );

        let plan = plan_dispatch(&chunker, "sys", &user);
        assert_eq!(plan.strategy, PlanStrategy::FreeText);
        assert!(plan.chunks.len() >= 8);

        for chunk in &plan.chunks {
            let body = chunk
                .content
                .strip_prefix(chunk_constants::TEXT_CONTEXT_PREFIX)
                .unwrap_or(&chunk.content);
            assert!(chunker.estimator().estimate(body) <= 1_000);
        }
        assert!(plan.chunks.last().unwrap().content.contains("[{\"url\":\"a\"}]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_system_prompt_with_empty_user_prompt() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 100);
        let system = "x ".repeat(1_000);

        let plan = orch.plan(&system, "");
        assert_eq!(plan.strategy, PlanStrategy::FreeText);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].content, "");

        let report = orch
            .execute(&PromptRequest::new(system, "", ReportKind::InsightList))
            .await
            .unwrap();
        assert_eq!(provider.call_count(), 1);
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.content, "response 0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_list_chunks_merge_by_url() {
        let provider = MockProvider::new(|n, _| {
            let body = if n == 0 {
                r#"{"top_pages":[{"url":"a"}]}"#
            } else {
                r#"{"top_pages":[{"url":"a"},{"url":"b"}]}"#
            };
            Ok(Completion::text(body))
        });
        let orch = orchestrator(Arc::clone(&provider), 200);

        let content = orch
            .complete("sys", &page_records(60), ReportKind::RecordList, true)
            .await
            .unwrap();

        assert!(provider.call_count() >= 2);
        assert_eq!(content, r#"{"top_pages":[{"url":"a"},{"url":"b"}]}"#);

        let prompts = provider.system_prompts();
        assert!(prompts[0].contains(&format!("part 1 of {}", prompts.len())));
        assert!(prompts[0].contains("pages in this chunk individually"));
        assert!(prompts.last().unwrap().contains("Complete and summarize"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_text_split_in_order() {
        let provider = MockProvider::new(|n, _| Ok(Completion::text(format!("part {}", n))));
        let orch = orchestrator(Arc::clone(&provider), 50);
        let user = "The site lost traffic in March. ".repeat(40);

        let report = orch
            .execute(&PromptRequest::new("sys", user, ReportKind::InsightList))
            .await
            .unwrap();

        let calls = provider.call_count();
        assert!(calls >= 2);
        let expected: Vec<String> = (0..calls).map(|n| format!("part {}", n)).collect();
        assert_eq!(
            report.content,
            expected.join(crate::constants::combine::TEXT_SEPARATOR)
        );
        assert_eq!(orch.metrics().summary().chunks, calls as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_is_not_cached() {
        let provider = MockProvider::new(|n, _| {
            if n == 1 {
                Err(RelayError::api("connection reset"))
            } else {
                Ok(Completion::text(format!("part {}", n)))
            }
        });
        let orch = orchestrator(Arc::clone(&provider), 50);
        let user = "Rankings dropped for brand queries. ".repeat(40);

        let report = orch
            .execute(&PromptRequest::new("sys", user, ReportKind::InsightList))
            .await
            .unwrap();

        assert_eq!(report.chunks.len(), provider.call_count());
        assert_eq!(report.failed_chunks(), 1);
        assert!(report.chunks[1].failed);
        assert!(!report.content.contains("connection reset"));
        assert!(orch.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_chunks_failed() {
        let provider = MockProvider::new(|_, _| Err(RelayError::api("down")));
        let orch = orchestrator(Arc::clone(&provider), 50);
        let user = "Impressions rose while clicks fell. ".repeat(40);

        let err = orch
            .complete("sys", &user, ReportKind::InsightList, true)
            .await
            .unwrap_err();

        match err {
            RelayError::AllChunksFailed { chunks, .. } => {
                assert_eq!(chunks, provider.call_count())
            }
            other => panic!("expected AllChunksFailed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_error_propagates() {
        let provider = MockProvider::new(|_, _| {
            Err(RelayError::from_http_status(429, "slow down", None))
        });
        let orch = orchestrator(Arc::clone(&provider), 22_400);
        let mut events = orch.subscribe();

        let err = orch
            .complete("sys", "short", ReportKind::InsightList, true)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RateLimitExceeded { .. }));
        assert!(orch.cache().is_empty());

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            saw_failure |= matches!(event, ProgressEvent::Failed { .. });
        }
        assert!(saw_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_json() {
        let provider = MockProvider::new(|_, _| {
            Ok(Completion::text("```json\n{\"insights\":[\"ok\"]}\n```"))
        });
        let orch = orchestrator(Arc::clone(&provider), 22_400);
        let value = orch
            .complete_json("sys", "short", ReportKind::InsightList, false)
            .await
            .unwrap();
        assert_eq!(value, json!({"insights": ["ok"]}));

        let prose = MockProvider::echo();
        let orch = orchestrator(prose, 22_400);
        let err = orch
            .complete_json("sys", "short", ReportKind::InsightList, false)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Parse(_)));
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let mut config = Config::default();
        config.llm.api_key = None;
        let err = RequestOrchestrator::from_config(&config).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_for_chunked_request() {
        let provider = MockProvider::echo();
        let orch = orchestrator(Arc::clone(&provider), 50);
        let mut events = orch.subscribe();
        let user = "Average position improved on desktop. ".repeat(40);

        orch.complete("sys", &user, ReportKind::InsightList, true)
            .await
            .unwrap();

        let mut started = 0;
        let mut planned = None;
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                ProgressEvent::Planned { chunks, .. } => planned = Some(chunks),
                ProgressEvent::ChunkStarted { .. } => started += 1,
                ProgressEvent::Completed { failed_chunks, .. } => {
                    completed = true;
                    assert_eq!(failed_chunks, 0);
                }
                _ => {}
            }
        }
        assert_eq!(planned, Some(provider.call_count()));
        assert_eq!(started, provider.call_count());
        assert!(completed);
    }
}
