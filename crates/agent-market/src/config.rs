//! Configuration for the market data pipeline

use crate::error::{MarketError, Result};
use crate::retry::RetryConfig;
use agent_utils::config as env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Data provider for daily bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataProvider {
    /// Yahoo Finance (default, no API key required)
    #[default]
    Yahoo,
    /// Alpha Vantage (requires API key)
    AlphaVantage,
}

impl std::str::FromStr for DataProvider {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yahoo" | "yfinance" => Ok(Self::Yahoo),
            "alpha_vantage" | "alphavantage" | "alpha-vantage" => Ok(Self::AlphaVantage),
            other => Err(MarketError::Configuration(format!(
                "unknown data provider '{other}'"
            ))),
        }
    }
}

/// Configuration for the market data pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Upstream provider of daily bars
    pub provider: DataProvider,

    /// Root directory of every durable cache file
    pub cache_dir: PathBuf,

    /// Global switch; when off every cache is a pass-through
    pub cache_enabled: bool,

    /// Memory-tier TTL for series
    pub memory_ttl: Duration,

    /// Maximum age of a durable series before it is ignored
    pub durable_staleness: Duration,

    /// TTL of persisted indicator results
    pub indicator_ttl: Duration,

    /// Optional bound on memory-tier entries
    pub memory_capacity: Option<usize>,

    /// Backoff policy around upstream fetches
    pub retry: RetryConfig,

    /// Shared request budget per minute for the upstream provider
    pub requests_per_minute: u32,

    /// Alpha Vantage API key (optional)
    pub alpha_vantage_api_key: Option<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            provider: DataProvider::Yahoo,
            cache_dir: PathBuf::from("data_cache"),
            cache_enabled: true,
            memory_ttl: Duration::from_secs(5 * 60),
            durable_staleness: Duration::from_secs(30 * 60),
            indicator_ttl: Duration::from_secs(24 * 60 * 60),
            memory_capacity: None,
            retry: RetryConfig::default(),
            requests_per_minute: 5,
            alpha_vantage_api_key: None,
        }
    }
}

impl MarketConfig {
    /// Create a new configuration builder
    pub fn builder() -> MarketConfigBuilder {
        MarketConfigBuilder::default()
    }

    /// Load overrides from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env::process_env)
    }

    /// Load overrides through an arbitrary variable lookup
    ///
    /// Unset variables keep their defaults. Recognised variables:
    /// `MARKET_PROVIDER`, `MARKET_CACHE_DIR`, `MARKET_CACHE_ENABLED`,
    /// `MARKET_MEMORY_TTL_SECS`, `MARKET_DURABLE_STALENESS_SECS`,
    /// `MARKET_INDICATOR_TTL_SECS`, `MARKET_MEMORY_CAPACITY`,
    /// `MARKET_MAX_RETRIES`, `MARKET_RETRY_BASE_MS`, `MARKET_RETRY_MAX_MS`,
    /// `MARKET_REQUESTS_PER_MINUTE`, `ALPHA_VANTAGE_API_KEY`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invalid = |e: env::ConfigError| MarketError::Configuration(e.to_string());
        let mut config = Self::default();

        if let Some(provider) = lookup("MARKET_PROVIDER") {
            config.provider = provider.parse()?;
        }
        if let Some(dir) = lookup("MARKET_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(enabled) = env::parse_bool(&lookup, "MARKET_CACHE_ENABLED").map_err(invalid)? {
            config.cache_enabled = enabled;
        }
        if let Some(ttl) = env::parse_duration_secs(&lookup, "MARKET_MEMORY_TTL_SECS").map_err(invalid)? {
            config.memory_ttl = ttl;
        }
        if let Some(ttl) =
            env::parse_duration_secs(&lookup, "MARKET_DURABLE_STALENESS_SECS").map_err(invalid)?
        {
            config.durable_staleness = ttl;
        }
        if let Some(ttl) =
            env::parse_duration_secs(&lookup, "MARKET_INDICATOR_TTL_SECS").map_err(invalid)?
        {
            config.indicator_ttl = ttl;
        }
        config.memory_capacity =
            env::parse_var(&lookup, "MARKET_MEMORY_CAPACITY", "an entry count").map_err(invalid)?;
        if let Some(retries) =
            env::parse_var(&lookup, "MARKET_MAX_RETRIES", "an integer").map_err(invalid)?
        {
            config.retry.max_retries = retries;
        }
        if let Some(base) = env::parse_duration_millis(&lookup, "MARKET_RETRY_BASE_MS").map_err(invalid)? {
            config.retry.base_delay = base;
        }
        if let Some(max) = env::parse_duration_millis(&lookup, "MARKET_RETRY_MAX_MS").map_err(invalid)? {
            config.retry.max_delay = max;
        }
        if let Some(rpm) =
            env::parse_var(&lookup, "MARKET_REQUESTS_PER_MINUTE", "an integer").map_err(invalid)?
        {
            config.requests_per_minute = rpm;
        }
        config.alpha_vantage_api_key = lookup("ALPHA_VANTAGE_API_KEY");

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.provider == DataProvider::AlphaVantage && self.alpha_vantage_api_key.is_none() {
            return Err(MarketError::Configuration(
                "Alpha Vantage API key required when using AlphaVantage provider".to_string(),
            ));
        }

        if self.requests_per_minute == 0 {
            return Err(MarketError::Configuration(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }

        if self.memory_capacity == Some(0) {
            return Err(MarketError::Configuration(
                "memory_capacity must be greater than 0 when set".to_string(),
            ));
        }

        self.retry.validate()
    }

    /// Directory of the generic key/value cache
    pub fn kv_dir(&self) -> PathBuf {
        self.cache_dir.join("kv")
    }

    /// Directory of the durable series tier
    pub fn series_dir(&self) -> PathBuf {
        self.cache_dir.join("series")
    }
}

/// Builder for MarketConfig
#[derive(Debug, Default)]
pub struct MarketConfigBuilder {
    provider: Option<DataProvider>,
    cache_dir: Option<PathBuf>,
    cache_enabled: Option<bool>,
    memory_ttl: Option<Duration>,
    durable_staleness: Option<Duration>,
    indicator_ttl: Option<Duration>,
    memory_capacity: Option<usize>,
    retry: Option<RetryConfig>,
    requests_per_minute: Option<u32>,
    alpha_vantage_api_key: Option<String>,
}

impl MarketConfigBuilder {
    /// Set the data provider
    pub fn provider(mut self, provider: DataProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the cache root directory
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Enable or disable every cache
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set the memory-tier TTL
    pub fn memory_ttl(mut self, ttl: Duration) -> Self {
        self.memory_ttl = Some(ttl);
        self
    }

    /// Set the durable-tier staleness threshold
    pub fn durable_staleness(mut self, staleness: Duration) -> Self {
        self.durable_staleness = Some(staleness);
        self
    }

    /// Set the TTL of persisted indicator results
    pub fn indicator_ttl(mut self, ttl: Duration) -> Self {
        self.indicator_ttl = Some(ttl);
        self
    }

    /// Bound the memory tier
    pub fn memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = Some(capacity);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the shared request budget
    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    /// Set Alpha Vantage API key
    pub fn alpha_vantage_api_key(mut self, key: impl Into<String>) -> Self {
        self.alpha_vantage_api_key = Some(key.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<MarketConfig> {
        let defaults = MarketConfig::default();

        let config = MarketConfig {
            provider: self.provider.unwrap_or(defaults.provider),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            cache_enabled: self.cache_enabled.unwrap_or(defaults.cache_enabled),
            memory_ttl: self.memory_ttl.unwrap_or(defaults.memory_ttl),
            durable_staleness: self.durable_staleness.unwrap_or(defaults.durable_staleness),
            indicator_ttl: self.indicator_ttl.unwrap_or(defaults.indicator_ttl),
            memory_capacity: self.memory_capacity.or(defaults.memory_capacity),
            retry: self.retry.unwrap_or(defaults.retry),
            requests_per_minute: self
                .requests_per_minute
                .unwrap_or(defaults.requests_per_minute),
            alpha_vantage_api_key: self.alpha_vantage_api_key,
        };

        config.validate()?;
        Ok(config)
    }
}
