//! # ai-response-cache
//!
//! 面向 AI 模型 API 调用的响应缓存（TTL 过期）与带指数退避的重试执行器。
//!
//! A keyed response cache with TTL expiry, composed with a retry-with-backoff
//! request executor for LLM and embedding API clients.
//!
//! ## Overview
//!
//! The [`RequestExecutor`] consults the cache first and only calls the
//! injected [`Transport`] on a miss. Transient failures (connection errors,
//! per-attempt timeouts, HTTP 429, HTTP 5xx) are retried with exponential
//! backoff and jitter; every other failure is returned immediately. Only
//! successful responses are cached.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_response_cache::{ExecutorConfig, HttpTransport, RequestDescriptor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ai_response_cache::Result<()> {
//!     let transport = Arc::new(HttpTransport::openai()?);
//!     let executor = ExecutorConfig::from_env().build_executor(transport).await?;
//!
//!     let request = RequestDescriptor::new("Explain quantum computing")
//!         .with_param("model", "gpt-4o-mini")
//!         .with_param("temperature", 0);
//!
//!     let first = executor.execute(&request).await?;
//!     let second = executor.execute(&request).await?;
//!     assert!(second.cached);
//!     println!("{} ({} attempts)", first.content, first.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Key derivation, TTL policy, memory / disk / null backends, typed manager |
//! | [`resilience`] | Retry policy, retry state machine, cancellable backoff sleep |
//! | [`transport`] | `Transport` capability and the OpenAI-compatible HTTP transport |
//! | [`executor`] | Cache-first request execution with retries and metrics |
//! | [`config`] | Defaults, env overrides, YAML loading, validation |
//! | [`error_class`] | Failure classification with retry semantics |
//! | [`types`] | Request descriptor and response types |

pub mod cache;
pub mod config;
pub mod error;
pub mod error_class;
pub mod executor;
pub mod resilience;
pub mod transport;
pub mod types;

pub use cache::{CacheKey, CacheKeyGenerator, CacheManager, CacheStats, EvictionPolicy};
pub use config::ExecutorConfig;
pub use error::{Error, ErrorContext};
pub use error_class::ErrorClass;
pub use executor::{ExecutorBuilder, ExecutorMetrics, RequestExecutor};
pub use resilience::{RetryConfig, RetryPolicy};
pub use transport::{HttpTransport, RawResponse, Transport};
pub use types::{RequestDescriptor, Response, TokenUsage};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
