//! TTL cache for values fetched from external hosts.
//!
//! Entries are keyed by source URL (for example a key-server endpoint) and
//! expire after a fixed TTL measured on an injected [`Clock`], so tests can
//! move time explicitly. Build one cache and pass it to whoever needs it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    fetched_at: DateTime<Utc>,
}

/// Cache of fetched values with a single TTL.
pub struct KeyCache<V> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> std::fmt::Debug for KeyCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache").field("ttl", &self.ttl).finish()
    }
}

impl<V: Clone + Send> KeyCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(entry.fetched_at);
        // A clock that went backwards keeps the entry.
        age.to_std().map_or(true, |age| age < self.ttl)
    }

    /// Cached value for `url`, if it has not expired.
    pub async fn get(&self, url: &str) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries
            .get(url)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value for `url`, calling `fetch` when it is missing
    /// or expired.
    ///
    /// Fetch errors are returned as-is and nothing is cached. The lock is not
    /// held across the fetch, so concurrent misses may fetch twice; the last
    /// writer wins.
    pub async fn get_or_fetch<F, Fut, E>(&self, url: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(url).await {
            debug!(url, "Key cache hit");
            return Ok(value);
        }

        debug!(url, "Key cache miss; fetching");
        let value = fetch().await?;
        self.insert(url, value.clone()).await;
        Ok(value)
    }

    pub async fn insert(&self, url: &str, value: V) {
        let entry = Entry {
            value,
            fetched_at: self.clock.now(),
        };
        self.entries.lock().await.insert(url.to_string(), entry);
    }

    /// Drop the entry for `url`. Returns whether one existed.
    pub async fn invalidate(&self, url: &str) -> bool {
        self.entries.lock().await.remove(url).is_some()
    }

    /// Remove every expired entry and return how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| self.is_fresh(entry, now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
