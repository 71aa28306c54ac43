//! TTL policy.

use super::backend::CacheEntry;
use std::time::Duration;
use tokio::time::Instant;

/// Decides whether a stored entry is still fresh. Stateless.
///
/// A zero TTL means "never cache": such entries are never valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtlPolicy;

impl TtlPolicy {
    pub fn is_valid(entry: &CacheEntry, now: Instant) -> bool {
        Self::is_fresh(now.saturating_duration_since(entry.created_at), entry.ttl)
    }

    pub fn is_fresh(age: Duration, ttl: Duration) -> bool {
        !ttl.is_zero() && age < ttl
    }

    /// Whether a value stored with `ttl` can ever be read back.
    pub fn is_cacheable(ttl: Duration) -> bool {
        !ttl.is_zero()
    }
}
