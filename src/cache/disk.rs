//! Disk-backed cache: one JSON record per key inside a directory.
//!
//! Records survive process restarts, so TTL is measured against the wall
//! clock rather than the monotonic clock used by [`super::MemoryCache`].

use super::backend::CacheBackend;
use super::key::CacheKey;
use super::policy::TtlPolicy;
use crate::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const RECORD_EXT: &str = "json";
/// Per-component name limit on common filesystems.
const MAX_FILE_NAME: usize = 255;

#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    created_at_ms: u64,
    ttl_ms: u64,
    data: String,
}

impl DiskRecord {
    fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.created_at_ms))
    }

    fn is_fresh(&self, now_ms: u64) -> bool {
        TtlPolicy::is_fresh(self.age(now_ms), Duration::from_millis(self.ttl_ms))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Persistent cache backend.
///
/// Writes go through a temp file and a rename so a crash never leaves a torn
/// record behind. Unreadable records are treated as misses and removed.
pub struct DiskCache {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskCache {
    /// Open (and create if needed) a cache directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "disk cache opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys made of `[A-Za-z0-9_-]` map to themselves; anything else is hex-encoded.
    /// Names that would exceed the file-name limit use the SHA-256 of the key instead.
    fn file_name(key: &CacheKey) -> String {
        let plain = !key.hash.is_empty()
            && key
                .hash
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        let name = if plain {
            format!("k_{}.{}", key.hash, RECORD_EXT)
        } else {
            format!("x_{}.{}", hex(key.hash.as_bytes()), RECORD_EXT)
        };
        if name.len() <= MAX_FILE_NAME {
            return name;
        }
        let digest = Sha256::digest(key.hash.as_bytes());
        format!("h_{}.{}", hex(&digest), RECORD_EXT)
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    async fn read_record(path: &Path) -> Result<Option<DiskRecord>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<DiskRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache record removed");
                Self::remove_quietly(path).await?;
                Ok(None)
            }
        }
    }

    async fn remove_quietly(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl CacheBackend for DiskCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let Some(record) = Self::read_record(&path).await? else {
            return Ok(None);
        };
        if record.key != key.hash {
            debug!(key = key.short(), "disk cache record belongs to another key");
            return Ok(None);
        }
        if !record.is_fresh(now_ms()) {
            let _guard = self.write_lock.lock().await;
            // Re-check under the lock: a concurrent set may have refreshed it.
            if let Some(current) = Self::read_record(&path).await? {
                if !current.is_fresh(now_ms()) {
                    Self::remove_quietly(&path).await?;
                    debug!(key = key.short(), "expired disk cache entry dropped");
                }
            }
            return Ok(None);
        }
        match BASE64.decode(record.data.as_bytes()) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(key = key.short(), error = %e, "undecodable cache record removed");
                let _guard = self.write_lock.lock().await;
                Self::remove_quietly(&path).await?;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock().await;
        if !TtlPolicy::is_cacheable(ttl) {
            Self::remove_quietly(&path).await?;
            return Ok(());
        }
        // created_at never moves backwards for a key, even if the wall clock does.
        let previous = Self::read_record(&path)
            .await?
            .map(|r| r.created_at_ms)
            .unwrap_or(0);
        let record = DiskRecord {
            key: key.hash.clone(),
            created_at_ms: now_ms().max(previous),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
            data: BASE64.encode(value),
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        Self::remove_quietly(&self.path_for(key)).await
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(Self::read_record(&self.path_for(key))
            .await?
            .map(|r| r.key == key.hash && r.is_fresh(now_ms()))
            .unwrap_or(false))
    }

    async fn clear(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for path in self.record_paths().await? {
            if Self::remove_quietly(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        let now = now_ms();
        let mut live = 0;
        for path in self.record_paths().await? {
            if let Some(record) = Self::read_record(&path).await? {
                if record.is_fresh(now) {
                    live += 1;
                }
            }
        }
        Ok(live)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let now = now_ms();
        let mut removed = 0;
        for path in self.record_paths().await? {
            if let Some(record) = Self::read_record(&path).await? {
                if !record.is_fresh(now) && Self::remove_quietly(&path).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}
