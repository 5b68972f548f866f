//! Response Cache
//!
//! In-memory TTL cache for completed responses, keyed by a hash of the full
//! prompt. Purely an optimization: callers behave the same with an empty cache.
//!
//! ## Expiry
//!
//! Entries are checked on read. An entry older than the TTL counts as a miss
//! and is evicted at that moment; `purge_expired` sweeps the rest.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::constants::cache as cache_constants;

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they outlived the TTL
    pub expired: u64,
}

/// Shared cache handle
pub type SharedCache = Arc<ResponseCache>;

/// TTL key/value store for completed responses
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(cache_constants::TTL_SECS))
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    pub fn shared(ttl: Duration) -> SharedCache {
        Arc::new(Self::new(ttl))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Deterministic, order-sensitive key for a prompt pair.
    ///
    /// Not cryptographic; collisions only cost a wrong cache hit.
    pub fn key_for(system_prompt: &str, user_prompt: &str) -> String {
        let mut hasher = DefaultHasher::new();
        system_prompt.hash(&mut hasher);
        user_prompt.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Fresh value for `key`, evicting it if it has expired
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now, self.ttl) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                return Some(entry.value.clone());
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now, self.ttl))
            .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        debug!(key = %key, "Cache store");
        self.entries.insert(
            key,
            CacheEntry {
                value: value.into(),
                created_at: Instant::now(),
            },
        );
    }

    /// Remove every entry, or only those whose key starts with `prefix`.
    /// Returns how many were removed.
    pub fn clear(&self, prefix: Option<&str>) -> usize {
        let before = self.entries.len();
        match prefix {
            Some(prefix) => self.entries.retain(|key, _| !key.starts_with(prefix)),
            None => self.entries.clear(),
        }
        let removed = before.saturating_sub(self.entries.len());
        debug!(removed, "Cache cleared");
        removed
    }

    /// Drop all expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(now, self.ttl));
        let removed = before.saturating_sub(self.entries.len());
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}
