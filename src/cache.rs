//! TTL cache of scrape results keyed by fingerprint.

use crate::{Fingerprint, ScrapeResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Arc<ScrapeResult>,
    pub stored_at: DateTime<Utc>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// In-process result cache.
///
/// Entries are never served past their expiry: `get` evicts an expired entry
/// it runs into, and [`ResultCache::spawn_sweeper`] clears the rest.
#[derive(Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ScrapeResult>> {
        let mut entries = self.lock();
        let now = Instant::now();

        let hit = match entries.get(fingerprint) {
            Some(entry) if !entry.is_expired(now) => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(fingerprint);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Store or overwrite a result. A zero `ttl` stores nothing.
    pub fn put(&self, fingerprint: Fingerprint, result: Arc<ScrapeResult>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let entry = CacheEntry {
            result,
            stored_at: Utc::now(),
            expires_at: Instant::now() + ttl,
        };
        self.lock().insert(fingerprint, entry);
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().remove(fingerprint).is_some()
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - entries.len();

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Sweep every `interval` until `stop` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = cache.sweep();
                        if evicted > 0 {
                            debug!("Cache sweep evicted {} expired entries", evicted);
                        }
                        crate::metrics::set_cache_entries(cache.len());
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Fingerprint, CacheEntry>> {
        // Entries stay consistent even if a holder panicked
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_result;
    use crate::{CaptureSpec, RenderOptions, RequestLimits};

    fn fingerprint(url: &str) -> Fingerprint {
        let settings = RenderOptions::default()
            .resolve(&RequestLimits::default())
            .unwrap();
        Fingerprint::compute(url, "html", CaptureSpec::default(), &settings).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new();
        let fp = fingerprint("https://example.com");
        cache.put(fp.clone(), Arc::new(sample_result("https://example.com")), Duration::from_secs(5));

        assert!(cache.get(&fp).is_some());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.get(&fp).is_none());
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = ResultCache::new();
        let short = fingerprint("https://a.example");
        let long = fingerprint("https://b.example");
        cache.put(short, Arc::new(sample_result("https://a.example")), Duration::from_secs(1));
        cache.put(long.clone(), Arc::new(sample_result("https://b.example")), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&long).is_some());
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let cache = ResultCache::new();
        let fp = fingerprint("https://example.com");
        cache.put(fp.clone(), Arc::new(sample_result("https://example.com")), Duration::ZERO);
        assert!(cache.is_empty());
        assert!(!cache.invalidate(&fp));
    }

    #[tokio::test]
    async fn test_put_overwrites_and_invalidate() {
        let cache = ResultCache::new();
        let fp = fingerprint("https://example.com");
        let ttl = Duration::from_secs(60);

        cache.put(fp.clone(), Arc::new(sample_result("https://first.example")), ttl);
        cache.put(fp.clone(), Arc::new(sample_result("https://second.example")), ttl);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp).unwrap().url, "https://second.example");

        assert!(cache.invalidate(&fp));
        assert!(cache.get(&fp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_stops_on_cancel() {
        let cache = Arc::new(ResultCache::new());
        let stop = CancellationToken::new();
        let fp = fingerprint("https://example.com");
        cache.put(fp, Arc::new(sample_result("https://example.com")), Duration::from_secs(1));

        let handle = cache.spawn_sweeper(Duration::from_secs(10), stop.clone());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 0);

        stop.cancel();
        handle.await.unwrap();
    }
}
