//! Upstream providers of daily bars

pub mod alpha_vantage;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageSource;
pub use yahoo::YahooSource;

use crate::config::{DataProvider, MarketConfig};
use crate::error::Result;
use crate::model::Bar;
use async_trait::async_trait;
use std::sync::Arc;

/// A provider of daily OHLCV bars
///
/// Implementations may fail transiently (network, throttling); callers are
/// expected to go through a [`crate::retry::RetryExecutor`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Up to `count` most recent daily bars for `symbol`, in any order
    async fn fetch_daily_bars(&self, symbol: &str, count: usize) -> Result<Vec<Bar>>;

    /// Provider name used in logs and errors
    fn name(&self) -> &'static str;
}

/// Build the source selected by `config.provider`
pub fn from_config(config: &MarketConfig) -> Result<Arc<dyn MarketDataSource>> {
    let source: Arc<dyn MarketDataSource> = match config.provider {
        DataProvider::Yahoo => Arc::new(YahooSource::new()),
        DataProvider::AlphaVantage => Arc::new(AlphaVantageSource::from_config(config)?),
    };
    Ok(source)
}
