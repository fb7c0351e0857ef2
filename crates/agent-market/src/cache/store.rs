//! Durable tier of the series cache
//!
//! One file per `(symbol, requested count)` at `<root>/<SYMBOL>/<count>.json`.

use super::{path_component, remove_quietly, write_atomic};
use crate::clock;
use crate::error::{MarketError, Result};
use crate::model::{Bar, Series};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A series as written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSeries {
    pub symbol: String,
    pub requested_count: usize,
    pub written_at: DateTime<Utc>,
    pub bars: Vec<Bar>,
}

impl StoredSeries {
    pub fn new(series: &Series, requested_count: usize, written_at: DateTime<Utc>) -> Self {
        Self {
            symbol: series.symbol().to_string(),
            requested_count,
            written_at,
            bars: series.bars().to_vec(),
        }
    }

    /// Rebuild the in-memory series, re-checking ordering and symbol tags
    pub fn into_series(self) -> Result<Series> {
        Series::new(self.symbol, self.bars)
    }

    fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        clock::is_live(self.written_at, clock::ttl(max_age), now)
    }
}

/// Directory of persisted series files
#[derive(Debug, Clone)]
pub struct SeriesStore {
    root: PathBuf,
}

impl SeriesStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(path_component(symbol))
    }

    fn entry_path(&self, symbol: &str, count: usize) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{count}.json"))
    }

    /// Write (or replace) the file for `(stored.symbol, stored.requested_count)`
    pub async fn save(&self, stored: &StoredSeries) -> Result<()> {
        let path = self.entry_path(&stored.symbol, stored.requested_count);
        write_atomic(&path, &serde_json::to_vec(stored)?).await?;
        debug!(
            "Persisted {} bars for {} (count {})",
            stored.bars.len(),
            stored.symbol,
            stored.requested_count
        );
        Ok(())
    }

    /// Read the exact `(symbol, count)` file
    pub async fn load(&self, symbol: &str, count: usize) -> Result<Option<StoredSeries>> {
        let path = self.entry_path(symbol, count);
        read_entry(&path).await
    }

    /// Every readable stored series for `symbol` holding at least `min_bars` bars
    pub async fn candidates(&self, symbol: &str, min_bars: usize) -> Result<Vec<StoredSeries>> {
        let mut found = Vec::new();
        for (count, path) in self.entries_for(symbol).await? {
            if count < min_bars {
                continue;
            }
            if let Some(stored) = read_entry(&path).await? {
                if stored.symbol == symbol && stored.bars.len() >= min_bars {
                    found.push(stored);
                }
            }
        }
        Ok(found)
    }

    /// The most recently written series for `symbol` with at least `count`
    /// bars and no older than `max_age`
    pub async fn find(
        &self,
        symbol: &str,
        count: usize,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredSeries>> {
        let freshest = self
            .candidates(symbol, count)
            .await?
            .into_iter()
            .filter(|stored| stored.is_fresh(max_age, now))
            .max_by_key(|stored| stored.written_at);
        Ok(freshest)
    }

    /// Delete every file written more than `max_age` before `now`
    pub async fn purge_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        for symbol in self.symbols().await? {
            for (_, path) in self.entries_for(&symbol).await? {
                let stale = match read_entry(&path).await? {
                    Some(stored) => !stored.is_fresh(max_age, now),
                    // already gone or removed as corrupt
                    None => continue,
                };
                if stale {
                    remove_quietly(&path).await;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Keep only the `keep` most recently written files of each symbol
    pub async fn retain_latest(&self, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for symbol in self.symbols().await? {
            let mut dated = Vec::new();
            for (_, path) in self.entries_for(&symbol).await? {
                if let Some(stored) = read_entry(&path).await? {
                    dated.push((stored.written_at, path));
                }
            }

            dated.sort_by(|a, b| b.0.cmp(&a.0));
            for (_, path) in dated.into_iter().skip(keep) {
                remove_quietly(&path).await;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Symbol directory names present on disk
    async fn symbols(&self) -> Result<Vec<String>> {
        let mut symbols = Vec::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(symbols),
            Err(e) => return Err(MarketError::cache_io(&self.root, e)),
        };

        while let Some(dir) = dirs
            .next_entry()
            .await
            .map_err(|e| MarketError::cache_io(&self.root, e))?
        {
            if dir.path().is_dir() {
                symbols.push(dir.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(symbols)
    }

    /// `(count, path)` for every `<count>.json` file of `symbol`
    async fn entries_for(&self, symbol: &str) -> Result<Vec<(usize, PathBuf)>> {
        let dir = self.symbol_dir(symbol);
        let mut entries = Vec::new();
        let mut files = match tokio::fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(MarketError::cache_io(&dir, e)),
        };

        while let Some(file) = files
            .next_entry()
            .await
            .map_err(|e| MarketError::cache_io(&dir, e))?
        {
            let path = file.path();
            let count = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(count) = count {
                entries.push((count, path));
            }
        }

        entries.sort_by_key(|(count, _)| *count);
        Ok(entries)
    }
}

/// Read one entry; corrupt files are deleted and read as absent
async fn read_entry(path: &Path) -> Result<Option<StoredSeries>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MarketError::cache_io(path, e)),
    };

    match serde_json::from_slice(&bytes) {
        Ok(stored) => Ok(Some(stored)),
        Err(e) => {
            warn!("Removing corrupt series file {}: {}", path.display(), e);
            remove_quietly(path).await;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn series(symbol: &str, n: usize) -> Series {
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let bars = (0..n)
            .map(|i| Bar {
                symbol: symbol.to_string(),
                date: first + chrono::Duration::days(i as i64),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.0 + i as f64,
                volume: 1_000,
            })
            .collect();
        Series::new(symbol, bars).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let stored = StoredSeries::new(&series("AAPL", 5), 5, now());

        store.save(&stored).await.unwrap();

        assert!(dir.path().join("AAPL").join("5.json").exists());
        assert_eq!(store.load("AAPL", 5).await.unwrap(), Some(stored));
        assert_eq!(store.load("AAPL", 6).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_find_prefers_freshest_large_enough() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::new(dir.path());

        store
            .save(&StoredSeries::new(&series("AAPL", 3), 3, now()))
            .await
            .unwrap();
        store
            .save(&StoredSeries::new(
                &series("AAPL", 10),
                10,
                now() - chrono::Duration::minutes(20),
            ))
            .await
            .unwrap();
        store
            .save(&StoredSeries::new(
                &series("AAPL", 20),
                20,
                now() - chrono::Duration::minutes(5),
            ))
            .await
            .unwrap();

        let found = store
            .find("AAPL", 5, Duration::from_secs(1800), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.requested_count, 20);

        let none = store
            .find("AAPL", 25, Duration::from_secs(1800), now())
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_find_skips_stale() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store
            .save(&StoredSeries::new(
                &series("MSFT", 10),
                10,
                now() - chrono::Duration::hours(1),
            ))
            .await
            .unwrap();

        let found = store
            .find("MSFT", 5, Duration::from_secs(1800), now())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_removed() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let path = dir.path().join("AAPL").join("5.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[1, 2").unwrap();

        assert!(store.load("AAPL", 5).await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_purge_and_retain() {
        let dir = tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        for (count, age_min) in [(5, 90), (10, 10), (15, 1)] {
            store
                .save(&StoredSeries::new(
                    &series("AAPL", count),
                    count,
                    now() - chrono::Duration::minutes(age_min),
                ))
                .await
                .unwrap();
        }
        store
            .save(&StoredSeries::new(&series("MSFT", 5), 5, now()))
            .await
            .unwrap();

        let purged = store
            .purge_older_than(Duration::from_secs(3600), now())
            .await
            .unwrap();
        assert_eq!(purged, 1);

        let trimmed = store.retain_latest(1).await.unwrap();
        assert_eq!(trimmed, 1);
        assert!(store.load("AAPL", 15).await.unwrap().is_some());
        assert!(store.load("AAPL", 10).await.unwrap().is_none());
        assert!(store.load("MSFT", 5).await.unwrap().is_some());
    }
}
