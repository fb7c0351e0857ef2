//! Generic TTL key/value cache on disk
//!
//! Entries live at `<root>/<namespace>/<sha256>.json`. The file name is a
//! content hash of the namespace, the method name and the canonical JSON of
//! the call parameters, so the same logical call always maps to the same
//! file. Object keys in `serde_json::Value` are kept sorted, which makes the
//! serialized parameters canonical.

use super::{path_component, remove_quietly, write_atomic};
use crate::clock::{self, SharedClock};
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key for a provider or computation call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Logical grouping, also the directory name
    pub namespace: String,
    /// Operation name within the namespace
    pub method: String,
    /// Canonical JSON of the call parameters
    pub params: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(
        namespace: impl Into<String>,
        method: impl Into<String>,
        params: &impl Serialize,
    ) -> Result<Self> {
        let canonical = serde_json::to_value(params)?;
        Ok(Self {
            namespace: namespace.into(),
            method: method.into(),
            params: serde_json::to_string(&canonical)?,
        })
    }

    /// Lowercase hex SHA-256 over namespace, method and params
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.method.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.params.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// On-disk envelope around a cached payload
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    namespace: String,
    method: String,
    params: String,
    created_at: DateTime<Utc>,
    ttl_ms: u64,
    payload: Value,
}

impl Envelope {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        clock::is_live(
            self.created_at,
            clock::ttl(Duration::from_millis(self.ttl_ms)),
            now,
        )
    }
}

/// Entry count and footprint of a [`PersistentCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

/// TTL key/value cache backed by one JSON file per key
#[derive(Debug, Clone)]
pub struct PersistentCache {
    root: PathBuf,
    enabled: bool,
    default_ttl: Duration,
    clock: SharedClock,
}

impl PersistentCache {
    /// Create a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>, default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            root: root.into(),
            enabled: true,
            default_ttl,
            clock,
        }
    }

    /// A cache whose reads always miss and whose writes do nothing
    pub fn disabled(clock: SharedClock) -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
            default_ttl: Duration::ZERO,
            clock,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(path_component(&key.namespace))
            .join(format!("{}.json", key.digest()))
    }

    /// Look up a live entry
    ///
    /// Expired and unreadable entries are misses and are deleted. Other I/O
    /// failures are logged and reported as misses.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        method: &str,
        params: &impl Serialize,
    ) -> Option<T> {
        if !self.enabled {
            return None;
        }

        let key = match CacheKey::new(namespace, method, params) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot build cache key for {}/{}: {}", namespace, method, e);
                return None;
            }
        };
        let path = self.entry_path(&key);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Cache miss for {}/{}", namespace, method);
                return None;
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", path.display(), e);
                return None;
            }
        };

        let envelope: Envelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Removing corrupt cache entry {}: {}", path.display(), e);
                remove_quietly(&path).await;
                return None;
            }
        };

        if !envelope.is_live(self.clock.now()) {
            debug!("Cache entry expired for {}/{}", namespace, method);
            remove_quietly(&path).await;
            return None;
        }

        match serde_json::from_value(envelope.payload) {
            Ok(value) => {
                debug!("Cache hit for {}/{}", namespace, method);
                Some(value)
            }
            Err(e) => {
                warn!("Removing undecodable cache entry {}: {}", path.display(), e);
                remove_quietly(&path).await;
                None
            }
        }
    }

    /// Store `value` under the default TTL
    pub async fn set(
        &self,
        namespace: &str,
        method: &str,
        params: &impl Serialize,
        value: &impl Serialize,
    ) -> Result<()> {
        self.set_with_ttl(namespace, method, params, value, self.default_ttl)
            .await
    }

    /// Store `value` with an explicit TTL
    pub async fn set_with_ttl(
        &self,
        namespace: &str,
        method: &str,
        params: &impl Serialize,
        value: &impl Serialize,
        ttl: Duration,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let key = CacheKey::new(namespace, method, params)?;
        let path = self.entry_path(&key);
        let envelope = Envelope {
            namespace: key.namespace,
            method: key.method,
            params: key.params,
            created_at: self.clock.now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            payload: serde_json::to_value(value)?,
        };

        write_atomic(&path, &serde_json::to_vec(&envelope)?).await?;
        debug!("Cached {}/{} at {}", namespace, method, path.display());
        Ok(())
    }

    /// Return the cached value or compute, store and return a fresh one
    ///
    /// A failed store is logged; the computed value is still returned.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        namespace: &str,
        method: &str,
        params: &(impl Serialize + Sync),
        fetcher: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(namespace, method, params).await {
            return Ok(value);
        }

        let value = fetcher().await?;
        if let Err(e) = self.set(namespace, method, params, &value).await {
            warn!("Failed to cache {}/{}: {}", namespace, method, e);
        }
        Ok(value)
    }

    /// Remove one entry; returns whether it existed
    pub async fn invalidate(
        &self,
        namespace: &str,
        method: &str,
        params: &impl Serialize,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }

        let path = self.entry_path(&CacheKey::new(namespace, method, params)?);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MarketError::cache_io(path, e)),
        }
    }

    /// Delete every expired or unreadable entry
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        self.purge_where(|envelope| !envelope.is_live(now)).await
    }

    /// Delete every entry created more than `age` ago, live or not
    pub async fn purge_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(clock::ttl(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.purge_where(|envelope| envelope.created_at < cutoff)
            .await
    }

    /// Count entries and bytes on disk
    pub async fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();
        for path in self.entry_files().await? {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    stats.entries += 1;
                    stats.total_bytes += meta.len();
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MarketError::cache_io(path, e)),
            }
        }
        Ok(stats)
    }

    async fn purge_where(&self, doomed: impl Fn(&Envelope) -> bool) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files().await? {
            let remove = match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Envelope>(&bytes) {
                    Ok(envelope) => doomed(&envelope),
                    Err(_) => true,
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(MarketError::cache_io(path, e)),
            };

            if remove {
                remove_quietly(&path).await;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Purged {} cache entries under {}", removed, self.root.display());
        }
        Ok(removed)
    }

    /// Every `*.json` file one level below the namespace directories
    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.enabled {
            return Ok(files);
        }

        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(MarketError::cache_io(&self.root, e)),
        };

        while let Some(namespace) = namespaces
            .next_entry()
            .await
            .map_err(|e| MarketError::cache_io(&self.root, e))?
        {
            let dir = namespace.path();
            if !dir.is_dir() {
                continue;
            }

            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| MarketError::cache_io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| MarketError::cache_io(&dir, e))?
            {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }
}
