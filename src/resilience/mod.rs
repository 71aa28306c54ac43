//! 弹性模块：指数退避重试策略与可取消的等待。
//!
//! # Resilience Primitives Module
//!
//! Retry policy for outbound model calls, expressed as an explicit state
//! machine so it can be exercised without any real transport.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RetryPolicy`] | `should_retry` / `next_delay` with exponential backoff and jitter |
//! | [`RetryState`] | Per-call state machine (`Pending -> Attempting -> ...`) |
//! | [`sleep_cancellable`] | Backoff sleep that resolves early on cancellation |
//!
//! ## Retry Policy
//!
//! Retryable failures are transient network errors, per-attempt timeouts,
//! HTTP 429 and HTTP 5xx. Everything else fails on the first attempt.
//!
//! ```rust
//! use ai_response_cache::resilience::{RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     RetryConfig::new()
//!         .with_max_retries(3)
//!         .with_base_delay(Duration::from_millis(500))
//!         .with_backoff_cap(Duration::from_secs(10)),
//! );
//! // Attempt 2 backs off around 500ms * 2^2, jittered into [1s, 3s].
//! let delay = policy.next_delay(2);
//! assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
//! ```

mod delay;
mod retry;

pub use delay::sleep_cancellable;
pub use retry::{Decision, RetryConfig, RetryPhase, RetryPolicy, RetryState};
