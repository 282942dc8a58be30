//! Time-bounded weather cache with single-flight refetch.
//!
//! Backed by a moka future cache: entries expire after the configured TTL,
//! and concurrent misses for the same key coalesce onto one outstanding
//! provider call instead of issuing duplicates. A context is therefore never
//! attached past its TTL: expiry forces a synchronous refetch, not a stale
//! read.

use super::weather::WeatherProvider;
use hearth_core::EnrichmentContext;
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for the weather cache.
#[derive(Debug, Clone)]
pub struct WeatherCacheConfig {
    /// Maximum age at which a cached snapshot may still be attached.
    pub ttl: Duration,

    /// Cache key for the deployment's location. A single-home deployment
    /// uses one key; the cache is partitioned per key regardless.
    pub location_key: String,
}

impl Default for WeatherCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            location_key: "home".to_string(),
        }
    }
}

/// Hit/miss counters exposed on the health surface.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// TTL cache in front of the weather provider.
pub struct WeatherCache<P> {
    cache: Cache<String, EnrichmentContext>,
    provider: P,
    config: WeatherCacheConfig,
    stats: Arc<CacheStats>,
}

impl<P: WeatherProvider> WeatherCache<P> {
    pub fn new(config: WeatherCacheConfig, provider: P) -> Self {
        let cache = Cache::builder()
            .max_capacity(8)
            .time_to_live(config.ttl)
            .build();
        Self {
            cache,
            provider,
            config,
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Shared handle to the cache's counters.
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// The current weather snapshot for the configured location.
    ///
    /// Returns the cached context on a hit; on a miss, fetches from the
    /// provider, stores the result with a fresh expiry, and returns it.
    /// A provider failure is non-fatal and yields `None`; the event
    /// proceeds unenriched.
    pub async fn current(&self) -> Option<EnrichmentContext> {
        if let Some(ctx) = self.cache.get(&self.config.location_key).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("enrich_cache_hits_total").increment(1);
            return Some(ctx);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("enrich_cache_misses_total").increment(1);

        // try_get_with coalesces concurrent misses for the same key onto a
        // single in-flight provider call.
        let result = self
            .cache
            .try_get_with(self.config.location_key.clone(), async {
                self.provider.fetch_current().await
            })
            .await;

        match result {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                metrics::counter!("enrich_provider_errors_total").increment(1);
                tracing::warn!(error = %e, "weather fetch failed, proceeding unenriched");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Provider that counts calls and can be told to fail.
    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl WeatherProvider for CountingProvider {
        async fn fetch_current(&self) -> Result<EnrichmentContext> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Config("provider down".to_string()));
            }
            Ok(EnrichmentContext {
                temperature_c: Some(18.0),
                humidity_pct: Some(60.0),
                pressure_hpa: Some(1012.0),
                wind_speed_ms: Some(2.0),
                condition: Some("Clear".to_string()),
                fetched_at: Utc::now(),
            })
        }
    }

    fn cache_with(
        ttl: Duration,
        fail: bool,
    ) -> (WeatherCache<CountingProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = CountingProvider {
            calls: Arc::clone(&calls),
            fail,
        };
        let config = WeatherCacheConfig {
            ttl,
            location_key: "home".to_string(),
        };
        (WeatherCache::new(config, provider), calls)
    }

    #[tokio::test]
    async fn test_lookups_within_ttl_share_one_provider_call() {
        let (cache, calls) = cache_with(Duration::from_secs(300), false);

        let first = cache.current().await;
        let second = cache.current().await;

        assert!(first.is_some());
        assert!(second.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_expiry_triggers_exactly_one_refetch() {
        let (cache, calls) = cache_with(Duration::from_millis(50), false);

        cache.current().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.current().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_non_fatal() {
        let (cache, calls) = cache_with(Duration::from_secs(300), true);

        assert!(cache.current().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let (cache, calls) = cache_with(Duration::from_secs(300), false);
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.current().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
