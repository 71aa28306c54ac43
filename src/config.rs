//! 配置：默认值、环境变量覆盖、YAML 文件加载与校验。
//!
//! Executor configuration.
//!
//! | Field | Env | Default |
//! |-------|-----|---------|
//! | `ttl_secs` | `AI_CACHE_TTL_SECS` | 3600 |
//! | `max_cache_size` | `AI_CACHE_MAX_ENTRIES` | unbounded |
//! | `eviction_policy` | `AI_CACHE_EVICTION_POLICY` | lru |
//! | `max_entry_size` | | 10 MiB |
//! | `cache_dir` | `AI_CACHE_DIR` | none (in-memory) |
//! | `key_prefix` | | none |
//! | `max_retries` | `AI_RETRY_MAX_RETRIES` | 3 |
//! | `base_delay_ms` | `AI_RETRY_BASE_DELAY_MS` | 1000 |
//! | `backoff_cap_ms` | `AI_RETRY_BACKOFF_CAP_MS` | 30000 |
//! | `jitter_band` | `AI_RETRY_JITTER_MIN` / `AI_RETRY_JITTER_MAX` | [0.5, 1.5] |
//! | `attempt_timeout_ms` | `AI_ATTEMPT_TIMEOUT_MS` | 30000 |
//! | `single_flight` | `AI_SINGLE_FLIGHT` | false |

use crate::cache::{
    CacheBackend, CacheConfig, CacheManager, DiskCache, EvictionPolicy, MemoryCache,
};
use crate::error::ErrorContext;
use crate::executor::RequestExecutor;
use crate::resilience::RetryConfig;
use crate::transport::Transport;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub ttl_secs: u64,
    pub max_cache_size: Option<usize>,
    pub eviction_policy: EvictionPolicy,
    pub max_entry_size: usize,
    pub cache_dir: Option<PathBuf>,
    pub key_prefix: Option<String>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_cap_ms: u64,
    pub jitter_band: [f64; 2],
    pub attempt_timeout_ms: u64,
    pub single_flight: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_cache_size: None,
            eviction_policy: EvictionPolicy::Lru,
            max_entry_size: 10 * 1024 * 1024,
            cache_dir: None,
            key_prefix: None,
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_cap_ms: 30_000,
            jitter_band: [0.5, 1.5],
            attempt_timeout_ms: 30_000,
            single_flight: false,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `AI_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to read config: {}", e),
                ErrorContext::new().with_details(path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Apply overrides from `lookup`. Unparseable values are ignored with a warning.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
        ) -> Option<T> {
            let raw = lookup(name)?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(var = name, value = %raw, "ignoring unparseable config override");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "AI_CACHE_TTL_SECS") {
            self.ttl_secs = v;
        }
        if let Some(v) = parsed::<usize>(&lookup, "AI_CACHE_MAX_ENTRIES") {
            self.max_cache_size = (v > 0).then_some(v);
        }
        if let Some(v) = parsed(&lookup, "AI_CACHE_EVICTION_POLICY") {
            self.eviction_policy = v;
        }
        if let Some(dir) = lookup("AI_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = parsed(&lookup, "AI_RETRY_MAX_RETRIES") {
            self.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "AI_RETRY_BASE_DELAY_MS") {
            self.base_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "AI_RETRY_BACKOFF_CAP_MS") {
            self.backoff_cap_ms = v;
        }
        if let Some(v) = parsed(&lookup, "AI_RETRY_JITTER_MIN") {
            self.jitter_band[0] = v;
        }
        if let Some(v) = parsed(&lookup, "AI_RETRY_JITTER_MAX") {
            self.jitter_band[1] = v;
        }
        if let Some(v) = parsed(&lookup, "AI_ATTEMPT_TIMEOUT_MS") {
            self.attempt_timeout_ms = v;
        }
        if let Some(raw) = lookup("AI_SINGLE_FLIGHT") {
            self.single_flight = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self
    }

    /// Whole seconds, rounded up so a sub-second TTL still caches.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl
            .as_secs()
            .saturating_add(u64::from(ttl.subsec_nanos() > 0));
        self
    }

    pub fn with_max_cache_size(mut self, entries: usize) -> Self {
        self.max_cache_size = Some(entries);
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_single_flight(mut self, enable: bool) -> Self {
        self.single_flight = enable;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == Some(0) {
            return Err(invalid("max_cache_size", "must be positive when set"));
        }
        if self.max_entry_size == 0 {
            return Err(invalid("max_entry_size", "must be positive"));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(invalid("attempt_timeout_ms", "must be positive"));
        }
        self.retry_config().validate()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_backoff_cap(Duration::from_millis(self.backoff_cap_ms))
            .with_jitter_band(self.jitter_band[0], self.jitter_band[1])
    }

    pub fn cache_config(&self) -> CacheConfig {
        let mut cfg = CacheConfig::new()
            .with_ttl(self.ttl())
            .with_max_entry_size(self.max_entry_size);
        if let Some(prefix) = &self.key_prefix {
            cfg = cfg.with_key_prefix(prefix.clone());
        }
        cfg
    }

    /// Disk backend when `cache_dir` is set, in-memory otherwise.
    pub async fn build_cache(&self) -> Result<Arc<CacheManager>> {
        let backend: Box<dyn CacheBackend> = match &self.cache_dir {
            Some(dir) => {
                if self.max_cache_size.is_some() || self.eviction_policy != EvictionPolicy::Lru {
                    warn!("max_cache_size and eviction_policy are ignored by the disk cache");
                }
                Box::new(DiskCache::open(dir).await?)
            }
            None => Box::new(MemoryCache::with_policy(
                self.max_cache_size.unwrap_or(0),
                self.eviction_policy,
            )),
        };
        Ok(Arc::new(CacheManager::new(self.cache_config(), backend)))
    }

    pub async fn build_executor(&self, transport: Arc<dyn Transport>) -> Result<RequestExecutor> {
        self.validate()?;
        let cache = self.build_cache().await?;
        RequestExecutor::builder(transport)
            .cache(cache)
            .retry(self.retry_config())
            .ttl(self.ttl())
            .attempt_timeout(Some(Duration::from_millis(self.attempt_timeout_ms)))
            .single_flight(self.single_flight)
            .build()
    }
}

fn invalid(field: &str, details: &str) -> Error {
    Error::configuration_with_context(
        format!("invalid value for {}", field),
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ExecutorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ttl(), Duration::from_secs(3600));
        assert_eq!(cfg.retry_config(), RetryConfig::default());
        assert!(!cfg.single_flight);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = ExecutorConfig::from_yaml_str(
            "ttl_secs: 60\nmax_cache_size: 500\neviction_policy: lfu\njitter_band: [1.0, 1.0]\nsingle_flight: true\n",
        )
        .unwrap();
        assert_eq!(cfg.ttl_secs, 60);
        assert_eq!(cfg.max_cache_size, Some(500));
        assert_eq!(cfg.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(cfg.jitter_band, [1.0, 1.0]);
        assert!(cfg.single_flight);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn test_yaml_validation_errors() {
        let err = ExecutorConfig::from_yaml_str("jitter_band: [2.0, 1.0]\n").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        let err = ExecutorConfig::from_yaml_str("max_cache_size: 0\n").unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("max_cache_size")
        );
        assert!(matches!(
            ExecutorConfig::from_yaml_str("ttl_secs: [").unwrap_err(),
            Error::Yaml(_)
        ));
        assert!(matches!(
            ExecutorConfig::from_yaml_str("eviction_policy: random\n").unwrap_err(),
            Error::Yaml(_)
        ));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("AI_CACHE_TTL_SECS", "120"),
            ("AI_CACHE_MAX_ENTRIES", "50"),
            ("AI_CACHE_EVICTION_POLICY", "FIFO"),
            ("AI_RETRY_MAX_RETRIES", "5"),
            ("AI_RETRY_BASE_DELAY_MS", "200"),
            ("AI_RETRY_JITTER_MIN", "0.8"),
            ("AI_ATTEMPT_TIMEOUT_MS", "not-a-number"),
            ("AI_SINGLE_FLIGHT", "TRUE"),
        ]
        .into_iter()
        .collect();
        let cfg = ExecutorConfig::default().overlay(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.ttl_secs, 120);
        assert_eq!(cfg.max_cache_size, Some(50));
        assert_eq!(cfg.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.base_delay_ms, 200);
        assert_eq!(cfg.jitter_band, [0.8, 1.5]);
        assert_eq!(cfg.attempt_timeout_ms, 30_000);
        assert!(cfg.single_flight);
        assert!(cfg.cache_dir.is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.yaml");
        let cfg = ExecutorConfig::new()
            .with_ttl(Duration::from_secs(30))
            .with_key_prefix("svc");
        std::fs::write(&path, serde_yaml::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(ExecutorConfig::from_file(&path).unwrap(), cfg);
        assert!(ExecutorConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_with_ttl_rounds_sub_second_up() {
        let cfg = ExecutorConfig::new().with_ttl(Duration::from_millis(500));
        assert_eq!(cfg.ttl_secs, 1);
        assert_eq!(cfg.ttl(), Duration::from_secs(1));
        let cfg = ExecutorConfig::new().with_ttl(Duration::from_millis(2_001));
        assert_eq!(cfg.ttl_secs, 3);
        let cfg = ExecutorConfig::new().with_ttl(Duration::from_secs(30));
        assert_eq!(cfg.ttl_secs, 30);
        let cfg = ExecutorConfig::new().with_ttl(Duration::ZERO);
        assert_eq!(cfg.ttl_secs, 0);
    }

    #[tokio::test]
    async fn test_build_cache_selects_backend() {
        let mem = ExecutorConfig::new()
            .with_max_cache_size(10)
            .with_eviction_policy(EvictionPolicy::Lfu);
        assert_eq!(mem.build_cache().await.unwrap().backend_name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let disk = ExecutorConfig::new().with_cache_dir(dir.path());
        assert_eq!(disk.build_cache().await.unwrap().backend_name(), "disk");
    }
}
