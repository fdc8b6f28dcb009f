// src/pipeline/cache.rs
//! In-memory dedup cache keyed by `(subject, category)`.
//!
//! Absolute TTL, no sliding refresh. `get` expires lazily so correctness never
//! depends on the sweeper; the sweeper only bounds memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use super::types::{CachePayload, Category};

#[derive(Debug, Clone)]
struct CacheEntry {
    created_at: Instant,
    payload: CachePayload,
}

/// Thread-safe TTL map. Each subject task only touches its own keys,
/// so a single short-lived mutex per operation is enough.
#[derive(Debug)]
pub struct DedupCache {
    inner: Mutex<HashMap<(String, Category), CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Lookup counters since construction. One lookup adds exactly one hit or one miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("dedup_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("dedup_cache_misses_total").increment(1);
        }
    }

    /// Live payload for `key`, removing it first if it outlived the TTL. Does not count.
    fn live_entry(
        &self,
        map: &mut HashMap<(String, Category), CacheEntry>,
        key: &(String, Category),
        now: Instant,
    ) -> Option<CachePayload> {
        let expired = now.saturating_duration_since(map.get(key)?.created_at) > self.ttl;
        if expired {
            map.remove(key);
            gauge!("dedup_cache_entries").set(map.len() as f64);
            tracing::debug!(target: "cache", subject = %key.0, category = %key.1, "lazy expiry");
            return None;
        }
        map.get(key).map(|e| e.payload.clone())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, Category), CacheEntry>> {
        // A panic while holding the guard cannot leave a half-written entry behind.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn get(&self, subject: &str, category: Category) -> Option<CachePayload> {
        self.get_at(subject, category, Instant::now())
    }

    /// Lookup relative to an explicit `now`. Expired entries are removed on read.
    pub fn get_at(&self, subject: &str, category: Category, now: Instant) -> Option<CachePayload> {
        let key = (subject.to_string(), category);
        let found = self.live_entry(&mut self.lock(), &key, now);
        self.record_lookup(found.is_some());
        found
    }

    /// First live entry for `subject` among `categories`, in order.
    /// Counts as a single lookup however many keys it inspects.
    pub fn get_any(&self, subject: &str, categories: &[Category]) -> Option<(Category, CachePayload)> {
        self.get_any_at(subject, categories, Instant::now())
    }

    pub fn get_any_at(
        &self,
        subject: &str,
        categories: &[Category],
        now: Instant,
    ) -> Option<(Category, CachePayload)> {
        let mut map = self.lock();
        let found = categories.iter().find_map(|&c| {
            self.live_entry(&mut map, &(subject.to_string(), c), now)
                .map(|p| (c, p))
        });
        drop(map);
        self.record_lookup(found.is_some());
        found
    }

    pub fn set(&self, subject: &str, category: Category, payload: CachePayload) {
        self.set_at(subject, category, payload, Instant::now());
    }

    /// Last write wins.
    pub fn set_at(&self, subject: &str, category: Category, payload: CachePayload, now: Instant) {
        let mut map = self.lock();
        map.insert(
            (subject.to_string(), category),
            CacheEntry {
                created_at: now,
                payload,
            },
        );
        gauge!("dedup_cache_entries").set(map.len() as f64);
    }

    /// Remove every entry older than the TTL. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut map = self.lock();
        let before = map.len();
        let ttl = self.ttl;
        map.retain(|_, e| now.saturating_duration_since(e.created_at) <= ttl);
        let removed = before - map.len();
        gauge!("dedup_cache_entries").set(map.len() as f64);
        removed
    }

    /// Drop everything (shutdown / admin reset). Returns the number of entries cleared.
    pub fn clear(&self) -> usize {
        let mut map = self.lock();
        let n = map.len();
        map.clear();
        gauge!("dedup_cache_entries").set(0.0);
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the periodic sweeper. Abort the returned handle to stop it.
pub fn spawn_sweeper(cache: Arc<DedupCache>, every: Duration) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick fires immediately; nothing can be expired yet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                tracing::info!(
                    target: "cache",
                    removed,
                    remaining = cache.len(),
                    "dedup sweep"
                );
            }
        }
    })
}
