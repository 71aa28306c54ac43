//! 响应缓存模块：带 TTL 的可插拔缓存后端，避免重复的模型 API 调用。
//!
//! # Response Caching Module
//!
//! Keyed response cache with lazy TTL expiry and optional size bounding.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKeyGenerator`] | Derives a SHA-256 [`CacheKey`] from a request descriptor |
//! | [`TtlPolicy`] | Pure freshness check; zero TTL never caches |
//! | [`CacheManager`] | Typed store with statistics over a backend |
//! | [`CacheBackend`] | Trait for byte-level storage |
//! | [`MemoryCache`] | In-memory backend, bounded or unbounded |
//! | [`EvictionPolicy`] | LRU, LFU or FIFO victim choice when bounded |
//! | [`DiskCache`] | Directory of JSON records, survives restarts |
//! | [`NullCache`] | No-op backend for disabling caching |
//!
//! ## Example
//!
//! ```rust
//! use ai_response_cache::cache::{CacheConfig, CacheKeyGenerator, CacheManager, MemoryCache};
//! use ai_response_cache::types::RequestDescriptor;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = CacheManager::new(
//!     CacheConfig::new().with_ttl(Duration::from_secs(60)),
//!     Box::new(MemoryCache::new(1000)),
//! );
//! let descriptor = RequestDescriptor::new("Explain quantum computing").with_param("model", "x");
//! let key = CacheKeyGenerator::new().derive(&descriptor).unwrap();
//!
//! cache.set(&key, &"Quantum computing is...".to_string()).await.unwrap();
//! let hit: Option<String> = cache.get(&key).await.unwrap();
//! assert_eq!(hit.as_deref(), Some("Quantum computing is..."));
//! # });
//! ```
//!
//! ## Expiry
//!
//! Entries are checked at read time only; there is no background sweeper.
//! An expired read counts as a miss and removes the entry. Call
//! [`CacheManager::purge_expired`] to reclaim space eagerly.

mod backend;
mod disk;
mod key;
mod manager;
mod policy;

pub use backend::{CacheBackend, CacheEntry, EvictionPolicy, MemoryCache, NullCache};
pub use disk::DiskCache;
pub use key::{CacheKey, CacheKeyGenerator};
pub use manager::{CacheConfig, CacheManager, CacheStats};
pub use policy::TtlPolicy;
