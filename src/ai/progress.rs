//! Request Progress Events
//!
//! The orchestrator announces what it is doing on a broadcast channel so a UI
//! can render chunk progress. Sending never blocks and never fails the
//! request; with no subscriber the events are simply dropped.

use tokio::sync::broadcast;

use crate::constants::PROGRESS_CHANNEL_CAPACITY;

/// Progress event types. `request_id` distinguishes concurrent requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Served from cache, no dispatch follows
    CacheHit { request_id: u64 },
    /// Dispatch plan decided
    Planned {
        request_id: u64,
        chunks: usize,
        estimated_tokens: usize,
    },
    /// Chunk handed to the queue
    ChunkStarted {
        request_id: u64,
        index: usize,
        total: usize,
    },
    /// Chunk finished, successfully or not
    ChunkFinished {
        request_id: u64,
        index: usize,
        total: usize,
        failed: bool,
    },
    /// Final result assembled
    Completed {
        request_id: u64,
        chunks: usize,
        failed_chunks: usize,
    },
    /// Request failed as a whole
    Failed { request_id: u64, error: String },
}

impl ProgressEvent {
    pub fn request_id(&self) -> u64 {
        match self {
            ProgressEvent::CacheHit { request_id }
            | ProgressEvent::Planned { request_id, .. }
            | ProgressEvent::ChunkStarted { request_id, .. }
            | ProgressEvent::ChunkFinished { request_id, .. }
            | ProgressEvent::Completed { request_id, .. }
            | ProgressEvent::Failed { request_id, .. } => *request_id,
        }
    }
}

/// Broadcast sender for progress events
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(PROGRESS_CHANNEL_CAPACITY)
    }
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Send an event; discarded when nobody is listening
    #[inline]
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
