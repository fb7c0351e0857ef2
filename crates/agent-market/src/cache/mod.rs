//! Caching layer for market data to reduce upstream calls
//!
//! - [`PersistentCache`]: generic namespaced key/value files with a TTL
//! - [`SeriesStore`]: durable tier holding one file per `(symbol, count)`
//! - [`MarketSeriesCache`]: memory tier in front of a [`SeriesStore`]
//!
//! Every file is written through [`write_atomic`], so a concurrent reader
//! sees either the previous payload or the new one, never a partial write.

pub mod persistent;
pub mod series;
pub mod store;

pub use persistent::{CacheKey, CacheStats, PersistentCache};
pub use series::{MarketSeriesCache, PersistOutcome, SeriesCacheSettings};
pub use store::{SeriesStore, StoredSeries};

use crate::error::{MarketError, Result};
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` via a sibling temp file and a rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| MarketError::cache_io(&dir, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let temp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        return Err(MarketError::cache_io(&temp, e));
    }

    if let Err(e) = tokio::fs::rename(&temp, path).await {
        // best effort: the temp file is garbage either way
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(MarketError::cache_io(path, e));
    }

    Ok(())
}

/// Remove a file, treating "already gone" as success
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove cache file {}: {}", path.display(), e),
    }
}

/// Make a name safe to use as a single path component
pub(crate) fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '^' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
