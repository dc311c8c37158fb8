// Cached request gateway: cache lookup in front of the resilient executor

use std::{future::Future, sync::Arc};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    cache::{CacheKey, RequestParams, ResultCache},
    error::ApiError,
    retry::{self, RetryConfig},
};

pub struct CachedGateway {
    cache: Option<Arc<ResultCache>>,
    retry_config: RetryConfig,
    coalesce: bool,
    // One lock per key currently being fetched, only used when coalescing
    in_flight: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl CachedGateway {
    pub fn new(cache: Option<Arc<ResultCache>>, retry_config: RetryConfig) -> Self {
        Self {
            cache,
            retry_config,
            coalesce: false,
            in_flight: DashMap::new(),
        }
    }

    /// Serializes concurrent misses for the same key so that only one of them
    /// reaches the network while the others wait for the cached result.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce = enabled;
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Returns the cached payload for `params`, or runs `fetch_fn` under the
    /// retry policy and caches a successful, non-empty result.
    pub async fn fetch<F, Fut>(&self, params: &RequestParams, fetch_fn: F) -> Result<Value, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        let Some(cache) = &self.cache else {
            return retry::execute(fetch_fn, &self.retry_config).await;
        };

        if let Some(hit) = cache.get(params) {
            debug!(endpoint = %params.endpoint, "serving response from cache");
            return Ok(hit);
        }

        if !self.coalesce {
            return self.fetch_and_store(cache, params, fetch_fn).await;
        }

        let slot = InFlightSlot::acquire(&self.in_flight, params.cache_key());
        let _held = slot.lock.lock().await;

        // Another caller may have filled the cache while we waited; the miss
        // was already counted above
        match cache.peek(params) {
            Some(hit) => {
                debug!(endpoint = %params.endpoint, "coalesced request served from cache");
                Ok(hit)
            }
            None => self.fetch_and_store(cache, params, fetch_fn).await,
        }
    }

    async fn fetch_and_store<F, Fut>(
        &self,
        cache: &ResultCache,
        params: &RequestParams,
        fetch_fn: F,
    ) -> Result<Value, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        let value = retry::execute(fetch_fn, &self.retry_config).await?;
        if cache.set(params, value.clone()) {
            debug!(endpoint = %params.endpoint, "cached upstream response");
        }
        Ok(value)
    }

    pub fn in_flight_keys(&self) -> usize {
        self.in_flight.len()
    }
}

// Registry entry for one caller; released on drop so a cancelled fetch does
// not leave its key behind.
struct InFlightSlot<'a> {
    registry: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn acquire(registry: &'a DashMap<CacheKey, Arc<Mutex<()>>>, key: CacheKey) -> Self {
        let lock = registry
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self { registry, key, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // Registry plus our own handle: nobody else is waiting on this key
        self.registry
            .remove_if(&self.key, |_, entry| Arc::strong_count(entry) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ManualClock,
        error::ErrorKind,
        models::Endpoint,
    };
    use serde_json::json;
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    const TTL: Duration = Duration::from_secs(30);

    fn gateway() -> (CachedGateway, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cache = Arc::new(ResultCache::with_clock(TTL, 16, clock.clone()));
        let retry = RetryConfig {
            max_retries: 2,
            delay_ms: 1,
        };
        (CachedGateway::new(Some(cache), retry), clock)
    }

    fn params() -> RequestParams {
        RequestParams::new(Endpoint::Routes)
            .with("dep_iata", "LHR")
            .with("access_key", "secret")
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let (gateway, _clock) = gateway();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let value = gateway
                .fetch(&params(), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(json!({"data": [1, 2]})) }
                })
                .await
                .unwrap();
            assert_eq!(value, json!({"data": [1, 2]}));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = gateway.cache().unwrap().stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hit_count, 2);
    }

    #[tokio::test]
    async fn test_credential_does_not_split_cache() {
        let (gateway, _clock) = gateway();
        let calls = AtomicU32::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!([1])) }
        };

        gateway.fetch(&params(), fetch).await.unwrap();
        let other_key = params().with("access_key", "another-secret");
        gateway.fetch(&other_key, fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (gateway, clock) = gateway();
        let calls = AtomicU32::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!([1])) }
        };

        gateway.fetch(&params(), fetch).await.unwrap();
        clock.advance(TTL + Duration::from_millis(1));
        gateway.fetch(&params(), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (gateway, _clock) = gateway();
        let calls = AtomicU32::new(0);

        let err = gateway
            .fetch(&params(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ApiError::ApiResponseError {
                        status_code: 503,
                        message: "unavailable".to_string(),
                        is_retryable: true,
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(gateway.cache().unwrap().is_empty());

        let err = gateway
            .fetch(&params(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ApiError::ApiResponseError {
                        status_code: 404,
                        message: "not found".to_string(),
                        is_retryable: false,
                    })
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_results_are_refetched() {
        let (gateway, _clock) = gateway();
        let calls = AtomicU32::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!({"success": true, "data": []})) }
        };

        gateway.fetch(&params(), fetch).await.unwrap();
        gateway.fetch(&params(), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(gateway.cache().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_fetches() {
        let gateway = CachedGateway::new(None, RetryConfig::no_retry());
        let calls = AtomicU32::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(json!([1])) }
        };

        gateway.fetch(&params(), fetch).await.unwrap();
        gateway.fetch(&params(), fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn slow_fetch(calls: &AtomicU32) -> Result<Value, ApiError> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!([42]))
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_independently() {
        let (gateway, _clock) = gateway();
        let calls = AtomicU32::new(0);
        let p = params();

        let (a, b) = tokio::join!(
            gateway.fetch(&p, || slow_fetch(&calls)),
            gateway.fetch(&p, || slow_fetch(&calls))
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_coalescing_collapses_concurrent_misses() {
        let (gateway, _clock) = gateway();
        let gateway = gateway.with_coalescing(true);
        let calls = AtomicU32::new(0);
        let p = params();

        let (a, b, c) = tokio::join!(
            gateway.fetch(&p, || slow_fetch(&calls)),
            gateway.fetch(&p, || slow_fetch(&calls)),
            gateway.fetch(&p, || slow_fetch(&calls))
        );

        assert_eq!(a.unwrap(), json!([42]));
        assert_eq!(b.unwrap(), json!([42]));
        assert_eq!(c.unwrap(), json!([42]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.in_flight_keys(), 0);

        let stats = gateway.cache().unwrap().stats();
        assert_eq!(stats.miss_count, 3);
        assert_eq!(stats.hit_count, 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_releases_in_flight_key() {
        let (gateway, _clock) = gateway();
        let gateway = gateway.with_coalescing(true);
        let p = params();

        let stalled = tokio::time::timeout(
            Duration::from_millis(20),
            gateway.fetch(&p, || futures::future::pending::<Result<Value, ApiError>>()),
        )
        .await;

        assert!(stalled.is_err());
        assert_eq!(gateway.in_flight_keys(), 0);

        let value = gateway.fetch(&p, || async { Ok(json!([7])) }).await.unwrap();
        assert_eq!(value, json!([7]));
        assert_eq!(gateway.in_flight_keys(), 0);
    }
}
