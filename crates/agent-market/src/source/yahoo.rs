//! Yahoo Finance daily bars

use super::MarketDataSource;
use crate::error::{MarketError, Result};
use crate::model::Bar;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use time::OffsetDateTime;
use tracing::debug;
use yahoo_finance_api as yahoo;

const PROVIDER: &str = "yahoo";
const MAX_SPAN_DAYS: usize = 36_500;

/// Daily bars from Yahoo Finance; no API key required
#[derive(Debug, Clone, Default)]
pub struct YahooSource;

impl YahooSource {
    pub fn new() -> Self {
        Self
    }

    /// Calendar days that hold at least `count` trading days, with slack for holidays
    fn calendar_span(count: usize) -> i64 {
        let days = (count.saturating_mul(3) / 2 + 10).min(MAX_SPAN_DAYS);
        i64::try_from(days).unwrap_or(36_500)
    }
}

fn map_yahoo_error(error: &yahoo::YahooError) -> MarketError {
    let reason = error.to_string();
    let lower = reason.to_ascii_lowercase();
    if lower.contains("429") || lower.contains("too many") {
        MarketError::RateLimited {
            provider: PROVIDER.to_string(),
        }
    } else {
        MarketError::TransientFetch {
            provider: PROVIDER.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    async fn fetch_daily_bars(&self, symbol: &str, count: usize) -> Result<Vec<Bar>> {
        let provider = yahoo::YahooConnector::new().map_err(|e| map_yahoo_error(&e))?;

        let end = Utc::now();
        let start = end - chrono::Duration::days(Self::calendar_span(count));
        let start_odt = OffsetDateTime::from_unix_timestamp(start.timestamp())
            .map_err(|e| MarketError::Configuration(format!("Invalid start timestamp: {e}")))?;
        let end_odt = OffsetDateTime::from_unix_timestamp(end.timestamp())
            .map_err(|e| MarketError::Configuration(format!("Invalid end timestamp: {e}")))?;

        debug!("Requesting {} daily bars for {} from Yahoo", count, symbol);
        let response = provider
            .get_quote_history(symbol, start_odt, end_odt)
            .await
            .map_err(|e| map_yahoo_error(&e))?;
        let quotes = response.quotes().map_err(|e| map_yahoo_error(&e))?;

        let mut bars = Vec::with_capacity(quotes.len());
        for q in quotes {
            let Some(date) = i64::try_from(q.timestamp)
                .ok()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive())
            else {
                continue;
            };
            // Yahoo pads halted days with empty quotes
            if ![q.open, q.high, q.low, q.close].iter().all(|p| p.is_finite() && *p > 0.0) {
                continue;
            }
            bars.push(Bar {
                symbol: symbol.to_string(),
                date,
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.close,
                volume: q.volume,
            });
        }

        bars.sort_by_key(|b| b.date);
        let skip = bars.len().saturating_sub(count);
        Ok(bars.split_off(skip))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}
