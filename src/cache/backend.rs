//! Cache backend implementations.

use super::key::CacheKey;
use super::policy::TtlPolicy;
use crate::error::ErrorContext;
use crate::{Error, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// One stored value and its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<u8>,
    pub created_at: Instant,
    pub ttl: Duration,
    pub last_accessed: Instant,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, data: Vec<u8>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            data,
            created_at: now,
            ttl,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn is_expired(&self) -> bool {
        !TtlPolicy::is_valid(self, Instant::now())
    }
}

/// Byte-level storage behind [`super::CacheManager`].
///
/// Implementations apply TTL lazily: an expired entry reads as absent and may
/// be dropped at that point.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    /// Overwrite unconditionally. A zero `ttl` stores nothing and drops any previous value.
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    /// Remove everything, returning how many entries were dropped.
    async fn clear(&self) -> Result<usize>;
    /// Number of live (unexpired) entries.
    async fn len(&self) -> Result<usize>;
    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
    /// Entries dropped to make room under a capacity bound.
    fn evictions(&self) -> u64 {
        0
    }
    fn name(&self) -> &'static str;
}

/// Victim selection for a bounded [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently read or written.
    #[default]
    Lru,
    /// Fewest hits; ties go to the least recently accessed.
    Lfu,
    /// Oldest write.
    Fifo,
}

impl EvictionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            other => Err(Error::configuration_with_context(
                format!("unknown eviction policy: {}", other),
                ErrorContext::new()
                    .with_field_path("eviction_policy")
                    .with_details("expected one of lru, lfu, fifo"),
            )),
        }
    }
}

/// In-memory cache with an optional entry bound.
///
/// Recency is refreshed on every hit and every set. When bounded, inserting a
/// new key at capacity first drops expired entries, then one victim chosen by
/// the [`EvictionPolicy`] (LRU unless configured otherwise).
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: Option<NonZeroUsize>,
    policy: EvictionPolicy,
    evictions: AtomicU64,
}

impl MemoryCache {
    /// LRU cache holding at most `max_entries`; `0` means unbounded.
    pub fn new(max_entries: usize) -> Self {
        Self::with_policy(max_entries, EvictionPolicy::Lru)
    }

    pub fn with_policy(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity: NonZeroUsize::new(max_entries),
            policy,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        self.entries.lock().map_err(|_| {
            Error::runtime_with_context(
                "MemoryCache poisoned",
                ErrorContext::new().with_source("memory_cache"),
            )
        })
    }

    fn purge_locked(entries: &mut LruCache<String, CacheEntry>) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !TtlPolicy::is_valid(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        expired.len()
    }

    fn evict_one(&self, entries: &mut LruCache<String, CacheEntry>) -> Option<String> {
        let victim = match self.policy {
            EvictionPolicy::Lru => return entries.pop_lru().map(|(k, _)| k),
            EvictionPolicy::Lfu => entries
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.last_accessed))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo => entries
                .iter()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(k, _)| k.clone()),
        }?;
        entries.pop(&victim);
        Some(victim)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match entries.get_mut(&key.hash) {
            None => return Ok(None),
            Some(entry) if TtlPolicy::is_valid(entry, now) => {
                entry.last_accessed = now;
                entry.access_count = entry.access_count.saturating_add(1);
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => {}
        }
        entries.pop(&key.hash);
        debug!(key = key.short(), "expired cache entry dropped");
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.lock()?;
        if !TtlPolicy::is_cacheable(ttl) {
            entries.pop(&key.hash);
            return Ok(());
        }
        if let Some(cap) = self.capacity {
            if entries.len() >= cap.get() && !entries.contains(&key.hash) {
                Self::purge_locked(&mut entries);
                if entries.len() >= cap.get() {
                    if let Some(victim) = self.evict_one(&mut entries) {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            evicted = %victim,
                            policy = %self.policy,
                            "cache at capacity, evicted entry"
                        );
                    }
                }
            }
        }
        let entry = CacheEntry::new(key.hash.clone(), value.to_vec(), ttl);
        entries.put(key.hash.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.pop(&key.hash).is_some())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let entries = self.lock()?;
        Ok(entries
            .peek(&key.hash)
            .map(|e| !e.is_expired())
            .unwrap_or(false))
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        let n = entries.len();
        entries.clear();
        Ok(n)
    }

    async fn len(&self) -> Result<usize> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries
            .iter()
            .filter(|(_, e)| TtlPolicy::is_valid(e, now))
            .count())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.lock()?;
        Ok(Self::purge_locked(&mut entries))
    }

    fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Backend that stores nothing; every read misses.
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<usize> {
        Ok(0)
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
