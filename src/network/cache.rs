//! Response cache
//!
//! TTL-bounded map with least-recently-used eviction and tag invalidation.
//! Expired entries are purged lazily, when they are read or when room is
//! needed for an insert.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A cached response
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cache key
    pub key: String,
    /// Cached payload
    pub payload: V,
    /// When the entry was stored
    pub timestamp: DateTime<Utc>,
    /// When the entry stops being served
    pub expires_at: Instant,
    /// Number of reads served
    pub access_count: u64,
    /// Last read (or the insert, if never read)
    pub last_accessed: Instant,
    /// Invalidation tags
    pub tags: HashSet<String>,
    /// Recency order; larger is more recent
    recency: u64,
}

impl<V> CacheEntry<V> {
    /// Whether the entry has outlived its TTL at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// What an insert displaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Expired entries purged to make room
    pub expired: usize,
    /// Live entry evicted as least recently used
    pub evicted: Option<String>,
}

/// TTL + LRU cache keyed by string
#[derive(Debug)]
pub struct ResponseCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
    max_size: usize,
    clock: u64,
}

impl<V: Clone> ResponseCache<V> {
    /// Create a cache holding at most `max_size` entries for `ttl` each
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_size: max_size.max(1),
            clock: 0,
        }
    }

    /// Store `payload` under `key`, replacing any previous entry
    pub fn insert<I, S>(&mut self, key: impl Into<String>, payload: V, tags: I) -> InsertOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let now = Instant::now();
        let mut outcome = InsertOutcome::default();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            outcome.expired = self.purge_expired_at(now);
            if self.entries.len() >= self.max_size {
                outcome.evicted = self.evict_lru();
            }
        }

        let recency = self.tick();
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                payload,
                timestamp: Utc::now(),
                expires_at: now + self.ttl,
                access_count: 0,
                last_accessed: now,
                tags: tags.into_iter().map(Into::into).collect(),
                recency,
            },
        );
        outcome
    }

    /// Read a live entry, purging it if it has expired
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        if self.entries.get(key)?.is_expired(now) {
            self.entries.remove(key);
            debug!(key, "Cache entry expired");
            return None;
        }

        let recency = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.last_accessed = now;
        entry.recency = recency;
        Some(entry.payload.clone())
    }

    /// Inspect an entry without touching its recency
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<V>> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Remove every entry tagged with any of `tags`; returns how many
    pub fn invalidate_tags<S: AsRef<str>>(&mut self, tags: &[S]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !tags.iter().any(|t| e.tags.contains(t.as_ref())));
        before - self.entries.len()
    }

    /// Remove a single entry
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop expired entries; returns how many
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }

    fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .entries
            .values()
            .min_by_key(|e| e.recency)
            .map(|e| e.key.clone())?;
        self.entries.remove(&key);
        debug!(key = %key, "Evicted least recently used cache entry");
        Some(key)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
