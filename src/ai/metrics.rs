//! Usage Metrics
//!
//! Counters for logical requests, cache effectiveness, outbound dispatches,
//! chunking and token usage. Thread-safe; one collector is shared by an
//! orchestrator and every task that calls into it.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = MetricsCollector::new();
//! metrics.record_dispatch(&completion.usage);
//! println!("{}", metrics.summary().display());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::ai::provider::TokenUsage;

// =============================================================================
// Metrics Collector
// =============================================================================

/// Thread-safe usage counters
pub struct MetricsCollector {
    start_time: Instant,
    /// Logical requests received by the orchestrator
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Successful outbound calls
    dispatches: AtomicU64,
    /// Outbound calls that failed
    dispatch_failures: AtomicU64,
    /// Logical requests that had to be split
    chunked_requests: AtomicU64,
    /// Chunks produced across all split requests
    chunks: AtomicU64,
    failed_chunks: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub elapsed_ms: u64,
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dispatches: u64,
    pub dispatch_failures: u64,
    pub chunked_requests: u64,
    pub chunks: u64,
    pub failed_chunks: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            chunked_requests: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            failed_chunks: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let counter = if hit {
            &self.cache_hits
        } else {
            &self.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful outbound call and its reported usage
    pub fn record_dispatch(&self, usage: &TokenUsage) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.input_tokens
            .fetch_add(usage.input_tokens as u64, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a split request and the number of chunks it produced
    pub fn record_chunked(&self, chunk_count: usize) {
        self.chunked_requests.fetch_add(1, Ordering::Relaxed);
        self.chunks.fetch_add(chunk_count as u64, Ordering::Relaxed);
    }

    pub fn record_failed_chunk(&self) {
        self.failed_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSummary {
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);

        MetricsSummary {
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            chunked_requests: self.chunked_requests.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            failed_chunks: self.failed_chunks.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Get final summary
    pub fn summary(&self) -> MetricsSummary {
        self.snapshot()
    }
}

impl MetricsSummary {
    /// Share of cache lookups that hit, 0.0 when nothing was looked up
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    /// Format summary for display
    pub fn display(&self) -> String {
        format!(
            "Duration: {:.1}s\n\
             Requests: {} (cache hits: {}, hit rate: {:.0}%)\n\
             API Calls: {} ({} failed)\n\
             Chunked: {} requests, {} chunks ({} failed)\n\
             Tokens: {} (input: {}, output: {})",
            self.elapsed_ms as f64 / 1000.0,
            self.requests,
            self.cache_hits,
            self.cache_hit_rate() * 100.0,
            self.dispatches,
            self.dispatch_failures,
            self.chunked_requests,
            self.chunks,
            self.failed_chunks,
            self.total_tokens,
            self.input_tokens,
            self.output_tokens
        )
    }
}

// =============================================================================
// Shared Type
// =============================================================================

/// Shared metrics collector
pub type SharedMetrics = Arc<MetricsCollector>;

/// Create shared metrics collector
pub fn create_shared_metrics() -> SharedMetrics {
    Arc::new(MetricsCollector::new())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_dispatch() {
        let metrics = MetricsCollector::new();
        metrics.record_request();
        metrics.record_cache_lookup(false);
        metrics.record_dispatch(&TokenUsage::from_openai(100, 50));

        let summary = metrics.summary();
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.cache_misses, 1);
        assert_eq!(summary.dispatches, 1);
        assert_eq!(summary.total_tokens, 150);
    }

    #[test]
    fn test_concurrent_recording() {
        use std::thread;

        let metrics = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_dispatch(&TokenUsage::from_openai(10, 5));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let summary = metrics.summary();
        assert_eq!(summary.dispatches, 1000);
        assert_eq!(summary.input_tokens, 10000);
        assert_eq!(summary.output_tokens, 5000);
    }

    #[test]
    fn test_summary_display() {
        let metrics = MetricsCollector::new();
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_chunked(3);
        metrics.record_failed_chunk();
        metrics.record_dispatch(&TokenUsage::from_openai(1000, 500));

        let summary = metrics.summary();
        assert!((summary.cache_hit_rate() - 0.5).abs() < f64::EPSILON);

        let display = summary.display();
        assert!(display.contains("1500"));
        assert!(display.contains("3 chunks (1 failed)"));
        assert!(display.contains("hit rate: 50%"));
    }
}
