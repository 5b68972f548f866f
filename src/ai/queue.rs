//! Rate-Limited Request Queue
//!
//! Serializes every outbound request to the completion service through one
//! dispatcher task.
//!
//! ## Scheduling
//!
//! 1. Work units enter an unbounded FIFO channel in arrival order
//! 2. The dispatcher takes one item, waits for capacity in the rate window,
//!    runs it to completion, and delivers the result to the submitter
//! 3. After every dispatch, successful or not, it sleeps a fixed interval
//!
//! The rate window and the dispatcher are owned by the task; nothing else can
//! touch them. The task is spawned on first submit, and only once.
//!
//! ## Item states
//!
//! ```text
//! queued --> dispatching --> succeeded
//!                       \--> failed
//! ```
//!
//! No retries happen here. Dropping a `submit` future does not cancel a
//! dispatch in flight, so the window always matches real remote usage.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::types::{RelayError, Result};

// =============================================================================
// Rate Window
// =============================================================================

/// Dispatch accounting for the rolling window.
///
/// Keeps the start time of every dispatch still inside the window, so no
/// window-length span ever sees more than `limit` dispatches.
#[derive(Debug)]
pub struct RateWindow {
    dispatches: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl RateWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            dispatches: VecDeque::new(),
            limit: limit.max(1) as usize,
            window,
        }
    }

    /// Dispatches recorded within the window ending at `now`
    pub fn requests_in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.dispatches.len()
    }

    /// How long to wait before the next dispatch may start, if at all
    pub fn delay_until_available(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.dispatches.len() < self.limit {
            return None;
        }
        self.dispatches
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .filter(|wait| !wait.is_zero())
    }

    pub fn record(&mut self, at: Instant) {
        self.dispatches.push_back(at);
    }

    fn prune(&mut self, now: Instant) {
        while self
            .dispatches
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            self.dispatches.pop_front();
        }
    }
}

// =============================================================================
// Queue Statistics
// =============================================================================

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    window_waits: AtomicU64,
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Times the dispatcher blocked on a full rate window
    pub window_waits: u64,
}

impl QueueStats {
    /// Items submitted but not yet finished
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.succeeded + self.failed)
    }
}

// =============================================================================
// Queue
// =============================================================================

/// A work unit with its result channel already captured.
/// Resolves to whether the work succeeded.
type Job = Box<dyn FnOnce() -> BoxFuture<'static, bool> + Send>;

struct QueueItem {
    id: u64,
    job: Job,
}

/// Shared queue handle
pub type SharedQueue = Arc<RateLimitedQueue>;

/// Single-flight, rate-windowed dispatcher for outbound requests
pub struct RateLimitedQueue {
    config: RateLimitConfig,
    sender: OnceLock<mpsc::UnboundedSender<QueueItem>>,
    counters: Arc<QueueCounters>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RateLimitedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedQueue")
            .field("config", &self.config)
            .field("running", &self.sender.get().is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RateLimitedQueue {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            sender: OnceLock::new(),
            counters: Arc::new(QueueCounters::default()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn shared(config: RateLimitConfig) -> SharedQueue {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Submit a unit of work and wait for its result.
    ///
    /// The work runs on the dispatcher task once the rate window has room.
    /// Must be called within a Tokio runtime.
    pub async fn submit<T, F, Fut>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                // A panicking unit fails alone; the dispatcher keeps serving
                let result = match AssertUnwindSafe(async move { work().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Queued request panicked");
                        Err(RelayError::api("Request panicked during dispatch"))
                    }
                };
                let succeeded = result.is_ok();
                // Submitter may have gone away; the dispatch still counted.
                let _ = reply_tx.send(result);
                succeeded
            })
        });

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(item = id, "Queued request");

        self.dispatcher()
            .send(QueueItem { id, job })
            .map_err(|_| RelayError::DispatcherStopped)?;

        reply_rx.await.map_err(|_| RelayError::DispatcherStopped)?
    }

    /// Current statistics snapshot
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            window_waits: self.counters.window_waits.load(Ordering::Relaxed),
        }
    }

    /// Sender to the dispatcher, spawning it on first use
    fn dispatcher(&self) -> &mpsc::UnboundedSender<QueueItem> {
        self.sender.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let window = RateWindow::new(self.config.requests_per_minute, self.config.window());
            tokio::spawn(run_dispatcher(
                rx,
                window,
                self.config.min_interval(),
                Arc::clone(&self.counters),
            ));
            debug!(
                limit = self.config.requests_per_minute,
                window_secs = self.config.window_secs,
                "Started request dispatcher"
            );
            tx
        })
    }
}

/// Dispatcher loop: one item at a time, in arrival order
async fn run_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<QueueItem>,
    mut window: RateWindow,
    min_interval: Duration,
    counters: Arc<QueueCounters>,
) {
    while let Some(item) = receiver.recv().await {
        if let Some(wait) = window.delay_until_available(Instant::now()) {
            counters.window_waits.fetch_add(1, Ordering::Relaxed);
            warn!(
                item = item.id,
                wait_ms = wait.as_millis() as u64,
                "Rate window full, waiting"
            );
            sleep(wait).await;
        }

        let started = Instant::now();
        window.record(started);
        counters.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(
            item = item.id,
            in_window = window.requests_in_window(started),
            "Dispatching request"
        );

        let succeeded = (item.job)().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if succeeded {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            debug!(item = item.id, elapsed_ms, "Request succeeded");
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(item = item.id, elapsed_ms, "Request failed");
        }

        sleep(min_interval).await;
    }

    debug!("Request dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn config(limit: u32, window_secs: u64, min_interval_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: limit,
            window_secs,
            min_interval_ms,
        }
    }

    #[test]
    fn test_rate_window_blocks_when_full() {
        let start = Instant::now();
        let mut window = RateWindow::new(2, Duration::from_secs(60));

        assert_eq!(window.delay_until_available(start), None);
        window.record(start);
        window.record(start + Duration::from_secs(10));

        let wait = window.delay_until_available(start + Duration::from_secs(20));
        assert_eq!(wait, Some(Duration::from_secs(40)));

        // Oldest dispatch leaves the window after 60s
        assert_eq!(window.delay_until_available(start + Duration::from_secs(60)), None);
        assert_eq!(window.requests_in_window(start + Duration::from_secs(60)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_submitter_gets_its_result() {
        let queue = RateLimitedQueue::shared(config(100, 60, 10));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.submit(move || async move { Ok(i * 2) }).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6, 8]);

        let stats = queue.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.succeeded, 5);
        assert_eq!(stats.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_does_not_poison_later_items() {
        let queue = RateLimitedQueue::new(config(100, 60, 0));

        let first: Result<u32> = queue
            .submit(|| async { Err(RelayError::api("boom")) })
            .await;
        let second: Result<u32> = queue.submit(|| async { Ok(7) }).await;

        assert!(matches!(first, Err(RelayError::Api { .. })));
        assert_eq!(second.unwrap(), 7);

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_item_fails_alone() {
        let queue = RateLimitedQueue::shared(config(100, 60, 0));

        fn broken_call() -> Result<u32> {
            panic!("provider bug")
        }

        let first = queue.submit(|| async { broken_call() }).await;
        let second: Result<u32> = queue.submit(|| async { Ok(7) }).await;

        assert!(matches!(first, Err(RelayError::Api { .. })));
        assert_eq!(second.unwrap(), 7);

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_request_in_flight() {
        let queue = RateLimitedQueue::shared(config(100, 60, 0));
        let in_flight = Arc::new(AtomicU64::new(0));
        let max_seen = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    queue
                        .submit(move || async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(50)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_twice_the_limit_never_exceeds_window() {
        let limit = 3u32;
        let window = Duration::from_secs(60);
        let queue = RateLimitedQueue::shared(config(limit, 60, 1000));
        let dispatch_times = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..(2 * limit))
            .map(|_| {
                let queue = Arc::clone(&queue);
                let times = Arc::clone(&dispatch_times);
                tokio::spawn(async move {
                    queue
                        .submit(move || async move {
                            times.lock().unwrap().push(Instant::now());
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let times = dispatch_times.lock().unwrap().clone();
        assert_eq!(times.len(), 6);
        for (i, start) in times.iter().enumerate() {
            let in_window = times[i..]
                .iter()
                .filter(|t| t.duration_since(*start) < window)
                .count();
            assert!(in_window <= limit as usize, "window starting at #{i} saw {in_window}");
        }
        assert!(queue.stats().window_waits >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval_between_dispatches() {
        let queue = RateLimitedQueue::shared(config(100, 60, 1000));
        let dispatch_times = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let times = Arc::clone(&dispatch_times);
            queue
                .submit(move || async move {
                    times.lock().unwrap().push(Instant::now());
                    Ok(())
                })
                .await
                .unwrap();
        }

        let times = dispatch_times.lock().unwrap().clone();
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_submit_still_dispatches() {
        let queue = RateLimitedQueue::shared(config(100, 60, 0));
        let ran = Arc::new(AtomicU64::new(0));

        let ran_clone = Arc::clone(&ran);
        let abandoned = queue.submit(move || async move {
            sleep(Duration::from_millis(100)).await;
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // Poll once so the item is enqueued, then drop the future
        let _ = tokio::time::timeout(Duration::from_millis(10), abandoned).await;

        let value: u32 = queue.submit(|| async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
