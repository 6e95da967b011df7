//! TTL cache for the remote ledger tip
//!
//! Concurrent callers share one in-flight fetch: the lock is held across
//! the fetch, so a second caller waits and then reads the fresh value.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[cfg(feature = "tracing")]
use tracing::debug;

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy)]
struct CachedTip {
    tip_position: u64,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct TipCache {
    ttl: Duration,
    entry: Mutex<Option<CachedTip>>,
}

impl TipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached tip if it has not expired
    pub async fn cached(&self) -> Option<u64> {
        let entry = self.entry.lock().await;
        entry
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.tip_position)
    }

    /// Return the cached tip, calling `fetch` when it is missing or stale.
    ///
    /// A failed fetch leaves the previous entry in place.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<u64, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, ServiceError>>,
    {
        let mut entry = self.entry.lock().await;
        if let Some(cached) = entry.filter(|cached| cached.fetched_at.elapsed() < self.ttl) {
            return Ok(cached.tip_position);
        }

        let tip_position = fetch().await?;
        #[cfg(feature = "tracing")]
        debug!("Fetched remote tip {}", tip_position);
        *entry = Some(CachedTip {
            tip_position,
            fetched_at: Instant::now(),
        });
        Ok(tip_position)
    }

    /// Record a tip seen elsewhere, e.g. in a query reply.
    ///
    /// The ledger only grows, so a lower value never replaces a fresh entry.
    pub async fn observe(&self, tip_position: u64) {
        let mut entry = self.entry.lock().await;
        let fresh_higher = entry.is_some_and(|cached| {
            cached.fetched_at.elapsed() < self.ttl && cached.tip_position > tip_position
        });
        if !fresh_higher {
            *entry = Some(CachedTip {
                tip_position,
                fetched_at: Instant::now(),
            });
        }
    }

    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fetches_once_within_ttl() {
        let cache = TipCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let tip = cache
                .get_or_fetch(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(tip, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.cached().await, Some(42));

        cache.invalidate().await;
        assert_eq!(cache.cached().await, None);
        let tip = cache.get_or_fetch(|| async { Ok(43) }).await.unwrap();
        assert_eq!(tip, 43);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let cache = TipCache::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);
        for expected in 1..=2 {
            let tip = cache
                .get_or_fetch(|| async { Ok(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1) })
                .await
                .unwrap();
            assert_eq!(tip, expected);
        }
        assert_eq!(cache.cached().await, None);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_entry() {
        let cache = TipCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_fetch(|| async { Err(ServiceError::Timeout) })
            .await;
        assert_eq!(result, Err(ServiceError::Timeout));
        assert_eq!(cache.cached().await, None);
    }

    #[tokio::test]
    async fn test_observe_never_lowers_a_fresh_tip() {
        let cache = TipCache::new(Duration::from_secs(60));
        cache.observe(100).await;
        cache.observe(90).await;
        assert_eq!(cache.cached().await, Some(100));
        cache.observe(120).await;
        assert_eq!(cache.cached().await, Some(120));
    }
}
