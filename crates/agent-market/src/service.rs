//! Market data façade: cache, retried fetch and indicators in one place

use crate::cache::{MarketSeriesCache, PersistentCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::indicators::{IndicatorEngine, IndicatorKind, IndicatorReport};
use crate::model::{IndicatorSeries, ReportWindow, Series};
use crate::retry::{RetryExecutor, rate_limiter};
use crate::source::MarketDataSource;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Namespace of persisted indicator results
pub const INDICATOR_NAMESPACE: &str = "indicators";

/// Entry point used by analysis code
///
/// Series requests go memory cache, durable cache, then the upstream source
/// through the retry executor. Indicator requests additionally read and
/// write the persistent indicator cache.
pub struct MarketDataService {
    source: Arc<dyn MarketDataSource>,
    series_cache: Arc<MarketSeriesCache>,
    indicator_cache: PersistentCache,
    retry: RetryExecutor,
    engine: IndicatorEngine,
    clock: SharedClock,
}

impl std::fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataService")
            .field("source", &self.source.name())
            .field("series_cache", &self.series_cache)
            .field("indicator_cache", &self.indicator_cache)
            .field("retry", &self.retry.config())
            .finish_non_exhaustive()
    }
}

impl MarketDataService {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        series_cache: Arc<MarketSeriesCache>,
        indicator_cache: PersistentCache,
        retry: RetryExecutor,
        clock: SharedClock,
    ) -> Self {
        Self {
            source,
            series_cache,
            indicator_cache,
            retry,
            engine: IndicatorEngine::new(),
            clock,
        }
    }

    /// Wire every component from configuration
    ///
    /// Must be called from within a Tokio runtime; the series cache spawns
    /// its persist worker here.
    pub fn from_config(config: &MarketConfig, source: Arc<dyn MarketDataSource>) -> Result<Self> {
        config.validate()?;

        let clock: SharedClock = Arc::new(SystemClock);
        let series_cache = Arc::new(MarketSeriesCache::from_config(config, clock.clone()));
        let indicator_cache = if config.cache_enabled {
            PersistentCache::new(config.kv_dir(), config.indicator_ttl, clock.clone())
        } else {
            PersistentCache::disabled(clock.clone())
        };
        let retry = RetryExecutor::new(config.retry.clone())
            .with_rate_limiter(rate_limiter(config.requests_per_minute));

        info!(
            "Market data service using {} (cache {})",
            source.name(),
            if config.cache_enabled {
                config.cache_dir.display().to_string()
            } else {
                "disabled".to_string()
            }
        );

        Ok(Self::new(source, series_cache, indicator_cache, retry, clock))
    }

    /// Replace the engine used for reports
    pub fn with_engine(mut self, engine: IndicatorEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn series_cache(&self) -> &Arc<MarketSeriesCache> {
        &self.series_cache
    }

    pub fn indicator_cache(&self) -> &PersistentCache {
        &self.indicator_cache
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    /// The `count` most recent daily bars for `symbol`
    ///
    /// The result may be shorter than `count` when the provider has less
    /// history; such a short series is returned but not cached.
    pub async fn daily_bars(&self, symbol: &str, count: usize) -> Result<Series> {
        let symbol = normalize_symbol(symbol)?;
        if count == 0 {
            return Err(MarketError::InvalidSeries {
                symbol,
                reason: "requested bar count must be greater than 0".to_string(),
            });
        }

        if let Some(series) = self.series_cache.get(&symbol, count).await {
            return Ok(series);
        }

        let source = self.source.clone();
        let fetch_symbol = symbol.clone();
        let operation = format!("{}.fetch_daily_bars({symbol}, {count})", source.name());
        let bars = self
            .retry
            .execute(&operation, || {
                let source = source.clone();
                let symbol = fetch_symbol.clone();
                async move { source.fetch_daily_bars(&symbol, count).await }
            })
            .await?;

        let series = Series::new(symbol.clone(), bars)?.tail(count);
        if series.is_empty() {
            return Err(MarketError::InvalidSeries {
                symbol,
                reason: format!("{} returned no bars", self.source.name()),
            });
        }

        info!(
            "Fetched {} daily bars for {} from {}",
            series.len(),
            symbol,
            self.source.name()
        );

        if series.len() >= count {
            self.series_cache.set(&symbol, count, series.clone()).await;
        } else {
            warn!(
                "{} returned {} of {} requested bars for {}; not caching",
                self.source.name(),
                series.len(),
                count,
                symbol
            );
        }

        Ok(series)
    }

    /// Fetch several symbols with at most `concurrency` requests in flight
    ///
    /// Results come back in completion order, one per input symbol.
    pub async fn daily_bars_many(
        &self,
        symbols: &[String],
        count: usize,
        concurrency: usize,
    ) -> Vec<(String, Result<Series>)> {
        stream::iter(symbols)
            .map(|symbol| async move { (symbol.clone(), self.daily_bars(symbol, count).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await
    }

    /// One indicator for `symbol` over `window`, read through the indicator cache
    pub async fn indicator(
        &self,
        symbol: &str,
        kind: IndicatorKind,
        window: &ReportWindow,
    ) -> Result<IndicatorSeries> {
        let symbol = normalize_symbol(symbol)?;
        let params = json!({
            "symbol": symbol,
            "start": window.start(),
            "end": window.end(),
        });

        self.indicator_cache
            .get_or_fetch(INDICATOR_NAMESPACE, &kind.name(), &params, || async {
                let series = self
                    .daily_bars(&symbol, self.bars_needed(window, kind.min_bars()))
                    .await?;
                self.engine.calculate(kind, &series, window)
            })
            .await
    }

    /// Text report of the engine's indicator set
    pub async fn indicator_report(&self, symbol: &str, window: &ReportWindow) -> Result<IndicatorReport> {
        let kinds = self.engine.kinds().to_vec();
        self.indicator_report_with(symbol, window, &kinds).await
    }

    /// Text report of a chosen set of indicators
    ///
    /// Indicators the fetched history cannot support are listed as
    /// unavailable rather than failing the report.
    pub async fn indicator_report_with(
        &self,
        symbol: &str,
        window: &ReportWindow,
        kinds: &[IndicatorKind],
    ) -> Result<IndicatorReport> {
        let symbol = normalize_symbol(symbol)?;
        let warm_up = kinds.iter().map(IndicatorKind::min_bars).max().unwrap_or(1);
        let series = self
            .daily_bars(&symbol, self.bars_needed(window, warm_up))
            .await?;

        let batch = self.engine.calculate_many(kinds, &series, window);
        debug!(
            "Indicator report for {}: {}/{} computed",
            symbol, batch.succeeded, batch.attempted
        );
        Ok(IndicatorReport::from_batch(symbol, *window, kinds, &batch))
    }

    /// Bars covering `window` up to today plus `warm_up` bars before it
    ///
    /// Calendar days over-count trading days, so this errs on the long side.
    fn bars_needed(&self, window: &ReportWindow, warm_up: usize) -> usize {
        let today = self.clock.now().date_naive();
        let since_start = (today - window.start()).num_days().max(0);
        usize::try_from(since_start)
            .unwrap_or(usize::MAX)
            .saturating_add(warm_up)
            .saturating_add(1)
    }
}

/// Trim, upper-case and validate a ticker
pub fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(MarketError::InvalidSymbol(raw.to_string()))
    }
}
