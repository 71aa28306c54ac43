//! 请求执行器：先查缓存，未命中时经由重试状态机调用传输层，只缓存成功结果。
//!
//! Cache-first request executor.
//!
//! 1. derive the cache key (invalid descriptors fail before any I/O);
//! 2. serve a live cache entry without touching the transport;
//! 3. otherwise drive a [`RetryState`] around `Transport::send`, each attempt
//!    bounded by the per-attempt timeout;
//! 4. cache the success and return it, or return the typed error.
//!
//! Failures are never cached.

use crate::cache::{CacheConfig, CacheKey, CacheKeyGenerator, CacheManager, MemoryCache};
use crate::error::ErrorContext;
use crate::resilience::{sleep_cancellable, RetryConfig, RetryPhase, RetryPolicy, RetryState};
use crate::transport::{RawResponse, Transport};
use crate::types::{RequestDescriptor, Response};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ERROR_BODY_LIMIT: usize = 256;

/// Snapshot of executor counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorMetrics {
    pub total_requests: u64,
    pub cache_hits: u64,
    /// Calls that returned a response, cache hits included.
    pub successful: u64,
    pub failed: u64,
    /// Attempts started beyond the first.
    pub retry_attempts: u64,
    pub transport_attempts: u64,
    /// Mean wall time of calls answered by the transport.
    pub avg_latency_ms: f64,
}

impl ExecutorMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
struct AtomicMetrics {
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retry_attempts: AtomicU64,
    transport_attempts: AtomicU64,
    fresh_successes: AtomicU64,
    fresh_latency_ms: AtomicU64,
}

impl AtomicMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutorMetrics {
        let fresh = self.fresh_successes.load(Ordering::Relaxed);
        let latency = self.fresh_latency_ms.load(Ordering::Relaxed);
        ExecutorMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            transport_attempts: self.transport_attempts.load(Ordering::Relaxed),
            avg_latency_ms: if fresh == 0 {
                0.0
            } else {
                latency as f64 / fresh as f64
            },
        }
    }
}

type FlightMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Holds the per-key single-flight lock; unregisters the key when no one
/// else is waiting on it.
struct FlightGuard<'a> {
    map: &'a FlightMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        if let Ok(mut map) = self.map.lock() {
            // map + this guard
            if Arc::strong_count(OwnedMutexGuard::mutex(&guard)) == 2 {
                map.remove(&self.key);
            }
        }
        drop(guard);
    }
}

/// Cache-first executor with retry and backoff. `Send + Sync`; share it via `Arc`.
pub struct RequestExecutor {
    cache: Arc<CacheManager>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    keys: CacheKeyGenerator,
    ttl: Duration,
    attempt_timeout: Option<Duration>,
    inflight: Option<FlightMap>,
    metrics: AtomicMetrics,
}

impl RequestExecutor {
    pub fn builder(transport: Arc<dyn Transport>) -> ExecutorBuilder {
        ExecutorBuilder::new(transport)
    }

    /// Return the cached response for `descriptor`, or fetch, cache and return it.
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Response> {
        self.run(descriptor, None).await
    }

    /// Like [`execute`](Self::execute), but gives up with `Error::Cancelled`
    /// once `token` fires (before an attempt, during an attempt, or while
    /// backing off).
    pub async fn execute_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        token: &CancellationToken,
    ) -> Result<Response> {
        self.run(descriptor, Some(token)).await
    }

    /// Drop the cached response for `descriptor`. Returns whether one existed.
    pub async fn invalidate(&self, descriptor: &RequestDescriptor) -> Result<bool> {
        let key = self.keys.derive(descriptor)?;
        self.cache.evict(&key).await
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    async fn run(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&CancellationToken>,
    ) -> Result<Response> {
        AtomicMetrics::bump(&self.metrics.total_requests);
        let res = self.run_inner(descriptor, token).await;
        match &res {
            Ok(_) => AtomicMetrics::bump(&self.metrics.successful),
            Err(_) => AtomicMetrics::bump(&self.metrics.failed),
        }
        res
    }

    async fn run_inner(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&CancellationToken>,
    ) -> Result<Response> {
        let key = self.keys.derive(descriptor)?;
        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }

        let flight = self.enter_flight(&key, token).await?;
        if flight.is_some() {
            // Another caller may have filled the entry while we waited.
            if let Some(hit) = self.lookup(&key).await {
                return Ok(hit);
            }
        }

        let started = Instant::now();
        let mut state = RetryState::new(&self.policy);
        loop {
            if token.is_some_and(|t| t.is_cancelled()) {
                state.abort();
                return Err(Error::Cancelled);
            }
            state.begin_attempt()?;
            AtomicMetrics::bump(&self.metrics.transport_attempts);
            let attempt = state.attempt;
            if attempt > 0 {
                AtomicMetrics::bump(&self.metrics.retry_attempts);
            }
            let attempt_started = Instant::now();
            let outcome = self.attempt_cancellable(descriptor, token).await;
            let latency_ms = attempt_started.elapsed().as_millis() as u64;

            let err = match outcome {
                Ok(raw) => {
                    state.succeed()?;
                    info!(
                        key = key.short(),
                        attempt,
                        status = raw.status,
                        latency_ms,
                        "attempt succeeded"
                    );
                    let response = self
                        .finish(&key, descriptor, raw, started, state.attempts_made())
                        .await;
                    return Ok(response);
                }
                Err(Error::Cancelled) => {
                    state.abort();
                    return Err(Error::Cancelled);
                }
                Err(e) => e,
            };

            match state.fail(&err, &self.policy)? {
                RetryPhase::Retrying { delay } => {
                    warn!(
                        key = key.short(),
                        attempt,
                        status = err.status(),
                        class = err.class().name(),
                        latency_ms,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    if let Err(e) = sleep_cancellable(delay, token).await {
                        state.abort();
                        return Err(e);
                    }
                }
                _ => {
                    let attempts = state.attempts_made();
                    error!(
                        key = key.short(),
                        attempt,
                        attempts,
                        status = err.status(),
                        class = err.class().name(),
                        latency_ms,
                        error = %err,
                        "request failed"
                    );
                    return Err(if err.is_retryable() {
                        Error::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        }
                    } else {
                        err
                    });
                }
            }
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        match self.cache.get::<Response>(key).await {
            Ok(Some(mut hit)) => {
                AtomicMetrics::bump(&self.metrics.cache_hits);
                hit.cached = true;
                Some(hit)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = key.short(), error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn finish(
        &self,
        key: &CacheKey,
        descriptor: &RequestDescriptor,
        raw: RawResponse,
        started: Instant,
        attempts: u32,
    ) -> Response {
        let latency_ms = started.elapsed().as_millis() as u64;
        let response = Response {
            content: raw.body,
            model: raw.model.or_else(|| descriptor.model().map(str::to_string)),
            usage: raw.usage,
            latency_ms,
            attempts,
            cached: false,
        };
        AtomicMetrics::bump(&self.metrics.fresh_successes);
        self.metrics
            .fresh_latency_ms
            .fetch_add(latency_ms, Ordering::Relaxed);

        if let Err(e) = self.cache.set_with_ttl(key, &response, self.ttl).await {
            warn!(key = key.short(), error = %e, "failed to cache response");
        }
        response
    }

    async fn attempt_cancellable(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&CancellationToken>,
    ) -> Result<RawResponse> {
        match token {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                res = self.attempt(descriptor) => res,
            },
            None => self.attempt(descriptor).await,
        }
    }

    /// One transport call, bounded by the attempt timeout. Non-2xx statuses
    /// become typed errors.
    async fn attempt(&self, descriptor: &RequestDescriptor) -> Result<RawResponse> {
        let send = self.transport.send(descriptor);
        let raw = match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| Error::Timeout { after: limit })??,
            None => send.await?,
        };
        if raw.is_success() {
            return Ok(raw);
        }
        let message: String = raw.body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(Error::from_status(raw.status, message, raw.retry_after))
    }

    async fn enter_flight(
        &self,
        key: &CacheKey,
        token: Option<&CancellationToken>,
    ) -> Result<Option<FlightGuard<'_>>> {
        let Some(map) = self.inflight.as_ref() else {
            return Ok(None);
        };
        let lock = {
            let mut guard = map.lock().map_err(|_| {
                Error::runtime_with_context(
                    "single-flight lock poisoned",
                    ErrorContext::new().with_source("executor"),
                )
            })?;
            guard
                .entry(key.hash.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let owned = match token {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Cancelled),
                g = lock.lock_owned() => g,
            },
            None => lock.lock_owned().await,
        };
        debug!(key = key.short(), "single-flight slot acquired");
        Ok(Some(FlightGuard {
            map,
            key: key.hash.clone(),
            guard: Some(owned),
        }))
    }
}

/// Builder for [`RequestExecutor`].
///
/// Defaults: unbounded in-memory cache, default [`RetryConfig`], 1h TTL,
/// 30s attempt timeout, single-flight off.
pub struct ExecutorBuilder {
    transport: Arc<dyn Transport>,
    cache: Option<Arc<CacheManager>>,
    retry: RetryConfig,
    keys: CacheKeyGenerator,
    ttl: Option<Duration>,
    attempt_timeout: Option<Duration>,
    single_flight: bool,
}

impl ExecutorBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cache: None,
            retry: RetryConfig::default(),
            keys: CacheKeyGenerator::new(),
            ttl: None,
            attempt_timeout: Some(Duration::from_millis(30_000)),
            single_flight: false,
        }
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    /// TTL for stored responses. Defaults to the cache's configured TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// `None` disables the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Coalesce concurrent misses for the same key into one transport call.
    pub fn single_flight(mut self, enable: bool) -> Self {
        self.single_flight = enable;
        self
    }

    pub fn build(self) -> Result<RequestExecutor> {
        self.retry.validate()?;
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration_with_context(
                "attempt timeout must be positive",
                ErrorContext::new().with_field_path("attempt_timeout_ms"),
            ));
        }
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(CacheManager::new(
                CacheConfig::default(),
                Box::new(MemoryCache::unbounded()),
            ))
        });
        let ttl = self.ttl.unwrap_or(cache.config().default_ttl);
        Ok(RequestExecutor {
            cache,
            transport: self.transport,
            policy: RetryPolicy::new(self.retry),
            keys: self.keys,
            ttl,
            attempt_timeout: self.attempt_timeout,
            inflight: self.single_flight.then(|| Mutex::new(HashMap::new())),
            metrics: AtomicMetrics::default(),
        })
    }
}
