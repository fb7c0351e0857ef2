//! Two-tier cache of daily bar series
//!
//! Reads check memory first, then the durable [`SeriesStore`]. A durable hit
//! is promoted into memory. Writes land in memory immediately and are
//! persisted by a background task, so the caller never waits on disk.

use super::store::{SeriesStore, StoredSeries};
use crate::clock::{self, SharedClock};
use crate::config::MarketConfig;
use crate::model::Series;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Tuning for [`MarketSeriesCache`]
#[derive(Debug, Clone)]
pub struct SeriesCacheSettings {
    pub enabled: bool,
    pub memory_ttl: Duration,
    pub durable_staleness: Duration,
    pub memory_capacity: Option<usize>,
}

impl Default for SeriesCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_ttl: Duration::from_secs(300),
            durable_staleness: Duration::from_secs(1800),
            memory_capacity: None,
        }
    }
}

impl From<&MarketConfig> for SeriesCacheSettings {
    fn from(config: &MarketConfig) -> Self {
        Self {
            enabled: config.cache_enabled,
            memory_ttl: config.memory_ttl,
            durable_staleness: config.durable_staleness,
            memory_capacity: config.memory_capacity,
        }
    }
}

/// Result of one background persist, published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistOutcome {
    pub symbol: String,
    pub count: usize,
    pub result: std::result::Result<(), String>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    series: Series,
    stored_at: DateTime<Utc>,
}

enum PersistJob {
    Write(StoredSeries),
    Flush(oneshot::Sender<()>),
}

type MemoryKey = (String, usize);

/// Memory + durable cache keyed by `(symbol, count)`
pub struct MarketSeriesCache {
    memory: RwLock<HashMap<MemoryKey, MemoryEntry>>,
    store: Arc<SeriesStore>,
    writer: mpsc::UnboundedSender<PersistJob>,
    outcomes: broadcast::Sender<PersistOutcome>,
    settings: SeriesCacheSettings,
    clock: SharedClock,
}

impl std::fmt::Debug for MarketSeriesCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketSeriesCache")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MarketSeriesCache {
    /// Create the cache and spawn its persist worker
    ///
    /// Must be called from within a Tokio runtime. The worker exits once the
    /// cache is dropped and its queue has drained.
    pub fn new(store: SeriesStore, settings: SeriesCacheSettings, clock: SharedClock) -> Self {
        let store = Arc::new(store);
        let (writer, jobs) = mpsc::unbounded_channel();
        let (outcomes, _) = broadcast::channel(64);

        tokio::spawn(persist_worker(store.clone(), jobs, outcomes.clone()));

        Self {
            memory: RwLock::new(HashMap::new()),
            store,
            writer,
            outcomes,
            settings,
            clock,
        }
    }

    pub fn from_config(config: &MarketConfig, clock: SharedClock) -> Self {
        Self::new(
            SeriesStore::new(config.series_dir()),
            SeriesCacheSettings::from(config),
            clock,
        )
    }

    pub fn settings(&self) -> &SeriesCacheSettings {
        &self.settings
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    /// Look up `count` bars for `symbol`
    ///
    /// A live memory entry wins. Otherwise the freshest durable series with
    /// enough bars is trimmed to its most recent `count` bars, promoted into
    /// memory and returned.
    pub async fn get(&self, symbol: &str, count: usize) -> Option<Series> {
        if !self.settings.enabled {
            return None;
        }

        let key = (symbol.to_string(), count);
        let now = self.clock.now();
        let memory_ttl = clock::ttl(self.settings.memory_ttl);

        let expired = {
            let memory = self.memory.read().await;
            match memory.get(&key) {
                Some(entry) if !clock::is_live(entry.stored_at, memory_ttl, now) => true,
                Some(entry) if entry.series.len() >= count => {
                    debug!("Memory cache hit for {} ({} bars)", symbol, count);
                    return Some(entry.series.tail(count));
                }
                // too short to answer; let the durable tier try
                Some(_) | None => false,
            }
        };

        if expired {
            let mut memory = self.memory.write().await;
            // another task may have refreshed the entry meanwhile
            let still_expired = memory
                .get(&key)
                .is_some_and(|entry| !clock::is_live(entry.stored_at, memory_ttl, now));
            if still_expired {
                memory.remove(&key);
            }
        }

        let stored = match self
            .store
            .find(symbol, count, self.settings.durable_staleness, now)
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("Series cache miss for {} ({} bars)", symbol, count);
                return None;
            }
            Err(e) => {
                warn!("Durable series lookup failed for {}: {}", symbol, e);
                return None;
            }
        };

        let series = match stored.into_series() {
            Ok(series) => series.tail(count),
            Err(e) => {
                warn!("Ignoring invalid durable series for {}: {}", symbol, e);
                return None;
            }
        };

        debug!("Durable cache hit for {} ({} bars), promoting", symbol, count);
        self.insert(key, series.clone(), now).await;
        Some(series)
    }

    /// Store `series` as the answer for `(symbol, count)`
    ///
    /// Memory is updated before this returns; the durable write is queued.
    /// A series holding fewer than `count` bars is not stored.
    pub async fn set(&self, symbol: &str, count: usize, series: Series) {
        if !self.settings.enabled {
            return;
        }
        if series.len() < count {
            warn!(
                "Not caching {}: {} bars cannot answer a request for {}",
                symbol,
                series.len(),
                count
            );
            return;
        }

        let now = self.clock.now();
        let stored = StoredSeries::new(&series, count, now);
        self.insert((symbol.to_string(), count), series, now).await;

        if self.writer.send(PersistJob::Write(stored)).is_err() {
            warn!("Persist worker is gone; {} ({} bars) stays memory-only", symbol, count);
        }
    }

    async fn insert(&self, key: MemoryKey, series: Series, now: DateTime<Utc>) {
        let mut memory = self.memory.write().await;

        if let Some(capacity) = self.settings.memory_capacity {
            while memory.len() >= capacity && !memory.contains_key(&key) {
                let oldest = memory
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        debug!("Evicting {} ({} bars) from memory cache", oldest.0, oldest.1);
                        memory.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        memory.insert(
            key,
            MemoryEntry {
                series,
                stored_at: now,
            },
        );
    }

    /// Wait until every write queued before this call has been attempted
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.writer.send(PersistJob::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Receive the outcome of every later background persist
    pub fn subscribe(&self) -> broadcast::Receiver<PersistOutcome> {
        self.outcomes.subscribe()
    }

    /// Drop the memory tier; durable files are untouched
    pub async fn clear(&self) {
        let mut memory = self.memory.write().await;
        *memory = HashMap::new();
    }

    /// Remove expired memory entries, returning how many were dropped
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let memory_ttl = clock::ttl(self.settings.memory_ttl);
        let mut memory = self.memory.write().await;
        let before = memory.len();
        memory.retain(|_, entry| clock::is_live(entry.stored_at, memory_ttl, now));
        before - memory.len()
    }

    pub async fn len(&self) -> usize {
        self.memory.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memory.read().await.is_empty()
    }
}

async fn persist_worker(
    store: Arc<SeriesStore>,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
    outcomes: broadcast::Sender<PersistOutcome>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            PersistJob::Write(stored) => {
                let result = store.save(&stored).await.map_err(|e| {
                    warn!(
                        "Failed to persist {} ({} bars): {}",
                        stored.symbol, stored.requested_count, e
                    );
                    e.to_string()
                });
                // no subscribers is fine
                let _ = outcomes.send(PersistOutcome {
                    symbol: stored.symbol,
                    count: stored.requested_count,
                    result,
                });
            }
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Series persist worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::Bar;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn series(symbol: &str, n: usize) -> Series {
        let first = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bars = (0..n)
            .map(|i| Bar {
                symbol: symbol.to_string(),
                date: first + chrono::Duration::days(i as i64),
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.0 + i as f64,
                volume: 10,
            })
            .collect();
        Series::new(symbol, bars).unwrap()
    }

    fn cache(root: &std::path::Path, clock: &ManualClock, settings: SeriesCacheSettings) -> MarketSeriesCache {
        MarketSeriesCache::new(SeriesStore::new(root), settings, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_memory_hit_and_expiry() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());

        cache.set("AAPL", 5, series("AAPL", 5)).await;
        assert_eq!(cache.get("AAPL", 5).await, Some(series("AAPL", 5)));

        // past memory TTL, still inside durable staleness
        clock.advance(chrono::Duration::minutes(6));
        cache.flush().await;
        assert_eq!(cache.get("AAPL", 5).await, Some(series("AAPL", 5)));

        // past both
        clock.advance(chrono::Duration::minutes(40));
        assert_eq!(cache.get("AAPL", 5).await, None);
    }

    #[tokio::test]
    async fn test_durable_promotion_takes_most_recent_bars() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());

        cache.set("AAPL", 10, series("AAPL", 10)).await;
        cache.flush().await;
        cache.clear().await;
        assert!(cache.is_empty().await);

        let promoted = cache.get("AAPL", 4).await.unwrap();
        assert_eq!(promoted.len(), 4);
        assert_eq!(promoted.last_date(), series("AAPL", 10).last_date());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_disabled_is_pass_through() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let settings = SeriesCacheSettings {
            enabled: false,
            ..SeriesCacheSettings::default()
        };
        let cache = cache(dir.path(), &clock, settings);

        cache.set("AAPL", 5, series("AAPL", 5)).await;
        cache.flush().await;
        assert_eq!(cache.get("AAPL", 5).await, None);
        assert!(!dir.path().join("AAPL").exists());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let settings = SeriesCacheSettings {
            memory_capacity: Some(2),
            ..SeriesCacheSettings::default()
        };
        let cache = cache(dir.path(), &clock, settings);

        cache.set("A", 1, series("A", 1)).await;
        clock.advance(chrono::Duration::seconds(1));
        cache.set("B", 1, series("B", 1)).await;
        clock.advance(chrono::Duration::seconds(1));
        cache.set("C", 1, series("C", 1)).await;

        assert_eq!(cache.len().await, 2);
        let memory = cache.memory.read().await;
        assert!(!memory.contains_key(&("A".to_string(), 1)));
        assert!(memory.contains_key(&("C".to_string(), 1)));
    }

    #[tokio::test]
    async fn test_subscribe_reports_persist_outcome() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());
        let mut outcomes = cache.subscribe();

        cache.set("MSFT", 3, series("MSFT", 3)).await;
        let outcome = outcomes.recv().await.unwrap();

        assert_eq!(outcome.symbol, "MSFT");
        assert_eq!(outcome.count, 3);
        assert!(outcome.result.is_ok());
        assert!(dir.path().join("MSFT").join("3.json").exists());
    }

    #[tokio::test]
    async fn test_prune_expired() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());

        cache.set("A", 1, series("A", 1)).await;
        clock.advance(chrono::Duration::minutes(10));
        cache.set("B", 1, series("B", 1)).await;

        assert_eq!(cache.prune_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_short_series_never_served() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());

        cache.set("X", 10, series("X", 3)).await;
        cache.flush().await;

        assert_eq!(cache.get("X", 10).await, None);
        assert!(cache.is_empty().await);
        assert!(!dir.path().join("X").exists());
    }

    #[tokio::test]
    async fn test_memory_hit_is_trimmed_to_count() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());
        let long = series("X", 8);

        // a longer series stored under a smaller count
        cache.set("X", 5, long.clone()).await;
        let hit = cache.get("X", 5).await.unwrap();

        assert_eq!(hit.len(), 5);
        assert_eq!(hit, long.tail(5));
    }

    #[tokio::test]
    async fn test_short_memory_entry_falls_through_to_durable() {
        let dir = tempdir().unwrap();
        let clock = ManualClock::new(start());
        let cache = cache(dir.path(), &clock, SeriesCacheSettings::default());

        // memory-only short entry, planted past the guard in `set`
        cache.insert(("X".to_string(), 6), series("X", 2), start()).await;
        cache
            .store()
            .save(&StoredSeries::new(&series("X", 6), 6, start()))
            .await
            .unwrap();

        let hit = cache.get("X", 6).await.unwrap();
        assert_eq!(hit.len(), 6);
    }
}
