//! Market data pipeline for analyst agents
//!
//! This crate feeds numeric evidence to downstream analysis. It includes:
//!
//! - Daily OHLCV bars from Yahoo Finance or Alpha Vantage
//! - A two-tier series cache (memory + durable files) keyed by `(symbol, count)`
//! - A generic TTL key/value cache on disk for computed artifacts
//! - Retries with exponential backoff, cancellation and a shared rate limiter
//! - Technical indicators (SMA, EMA, MACD, RSI, Bollinger, ATR, VWMA, MFI)
//!
//! # Architecture
//!
//! [`MarketDataService`] is the entry point. A series request checks the
//! [`MarketSeriesCache`], then calls a [`MarketDataSource`] through the
//! [`RetryExecutor`] and fills both cache tiers. Indicators are computed by
//! the [`IndicatorEngine`] and optionally persisted in a [`PersistentCache`].
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_market::{IndicatorKind, MarketConfig, MarketDataService, ReportWindow, source};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MarketConfig::from_env()?;
//!     let service = MarketDataService::from_config(&config, source::from_config(&config)?)?;
//!
//!     let window = ReportWindow::trailing(chrono::Utc::now().date_naive(), 30);
//!     let rsi = service.indicator("AAPL", IndicatorKind::Rsi, &window).await?;
//!     print!("{}", rsi.render());
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod indicators;
pub mod model;
pub mod retry;
pub mod service;
pub mod source;

// Re-export main types for convenience
pub use cache::{MarketSeriesCache, PersistentCache, SeriesCacheSettings, SeriesStore};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{DataProvider, MarketConfig};
pub use error::{MarketError, Result};
pub use indicators::{IndicatorBatch, IndicatorEngine, IndicatorKind, IndicatorReport};
pub use model::{Bar, IndicatorPoint, IndicatorSeries, ReportWindow, Series};
pub use retry::{CancelToken, RetryConfig, RetryExecutor};
pub use service::MarketDataService;
pub use source::{AlphaVantageSource, MarketDataSource, YahooSource};
