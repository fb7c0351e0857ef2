//! Alpha Vantage daily bars

use super::MarketDataSource;
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::model::Bar;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "alpha_vantage";
/// Largest request served by `outputsize=compact`
const COMPACT_LIMIT: usize = 100;

/// Daily bars from Alpha Vantage `TIME_SERIES_DAILY`
///
/// Throttling is left to the caller's shared limiter; the free tier allows
/// only a handful of requests per minute.
#[derive(Debug, Clone)]
pub struct AlphaVantageSource {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AlphaVantageSource {
    /// Create a source with an API key
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(MarketError::Configuration(
                "Alpha Vantage API key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn from_config(config: &MarketConfig) -> Result<Self> {
        let key = config.alpha_vantage_api_key.as_deref().ok_or_else(|| {
            MarketError::Configuration("ALPHA_VANTAGE_API_KEY is not set".to_string())
        })?;
        Self::new(key)
    }

    /// Point the source at another endpoint (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MarketDataSource for AlphaVantageSource {
    async fn fetch_daily_bars(&self, symbol: &str, count: usize) -> Result<Vec<Bar>> {
        let output_size = if count > COMPACT_LIMIT { "full" } else { "compact" };
        debug!(
            "Requesting {} daily bars for {} from Alpha Vantage ({})",
            count, symbol, output_size
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "TIME_SERIES_DAILY"),
                ("symbol", symbol),
                ("outputsize", output_size),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketError::RateLimited {
                provider: PROVIDER.to_string(),
            });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(MarketError::Configuration(format!(
                "Alpha Vantage rejected the API key: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(MarketError::TransientFetch {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP error: {status}"),
            });
        }

        let body = response.text().await?;
        let data = decode_body(symbol, &body)?;
        let mut bars = parse_daily_response(symbol, &data)?;

        let skip = bars.len().saturating_sub(count);
        Ok(bars.split_off(skip))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

/// Decode a reply body; a body that is not JSON will not improve on retry
fn decode_body(symbol: &str, body: &str) -> Result<Value> {
    serde_json::from_str(body).map_err(|e| MarketError::InvalidSeries {
        symbol: symbol.to_string(),
        reason: format!("undecodable Alpha Vantage reply: {e}"),
    })
}

/// Turn a `TIME_SERIES_DAILY` reply into bars sorted by date
///
/// API-level failures come back as HTTP 200 with an explanatory field, so
/// they are classified here.
pub fn parse_daily_response(symbol: &str, data: &Value) -> Result<Vec<Bar>> {
    if let Some(message) = data.get("Error Message").and_then(Value::as_str) {
        return Err(if message.to_ascii_lowercase().contains("apikey") {
            MarketError::Configuration(message.to_string())
        } else {
            MarketError::InvalidSymbol(symbol.to_string())
        });
    }

    for field in ["Note", "Information"] {
        if let Some(message) = data.get(field).and_then(Value::as_str) {
            if message.to_ascii_lowercase().contains("premium") {
                return Err(MarketError::Configuration(message.to_string()));
            }
            debug!("Alpha Vantage throttled: {}", message);
            return Err(MarketError::RateLimited {
                provider: PROVIDER.to_string(),
            });
        }
    }

    let invalid = |reason: String| MarketError::InvalidSeries {
        symbol: symbol.to_string(),
        reason,
    };

    let days = data
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("no daily time series in response".to_string()))?;

    let mut bars = Vec::with_capacity(days.len());
    for (date, values) in days {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| invalid(format!("bad date '{date}': {e}")))?;
        let field = |name: &str| -> Result<String> {
            values
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("{date}: missing '{name}'")))
        };
        let price = |name: &str| -> Result<f64> {
            let raw = field(name)?;
            raw.parse()
                .map_err(|_| invalid(format!("{date}: '{name}' is not a number: {raw}")))
        };

        let volume_raw = field("5. volume")?;
        let volume = volume_raw
            .parse::<u64>()
            .map_err(|_| invalid(format!("{date}: volume is not an integer: {volume_raw}")))?;

        bars.push(Bar {
            symbol: symbol.to_string(),
            date,
            open: price("1. open")?,
            high: price("2. high")?,
            low: price("3. low")?,
            close: price("4. close")?,
            volume,
        });
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}
