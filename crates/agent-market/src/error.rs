//! Error types for market data operations

use std::path::PathBuf;
use thiserror::Error;

/// Market data pipeline errors
#[derive(Debug, Error)]
pub enum MarketError {
    /// Upstream provider failed in a way that may succeed on retry
    #[error("Transient fetch error from {provider}: {reason}")]
    TransientFetch { provider: String, reason: String },

    /// Rate limit exceeded for a provider
    #[error("Rate limit exceeded for {provider}")]
    RateLimited { provider: String },

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Every retry attempt failed; wraps the last failure
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<MarketError>,
    },

    /// Missing or rejected credentials, bad settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid stock symbol provided
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Upstream bars that cannot form a series
    #[error("Invalid series for {symbol}: {reason}")]
    InvalidSeries { symbol: String, reason: String },

    /// Reporting window with start after end
    #[error("Invalid window: {start} is after {end}")]
    InvalidWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Series too short for an indicator's lookback
    #[error("Insufficient data for {indicator}: need {required} bars, have {available}")]
    InsufficientData {
        indicator: String,
        required: usize,
        available: usize,
    },

    /// Unknown indicator name
    #[error("Unsupported indicator: {0}")]
    UnsupportedIndicator(String),

    /// Durable cache read/write failure
    #[error("Cache I/O error at {}: {source}", .path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Corrupt persisted payload or malformed upstream JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Retry loop aborted by its caller
    #[error("Operation '{0}' was cancelled")]
    Cancelled(String),
}

impl MarketError {
    /// Build a [`MarketError::CacheIo`] for `path`
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheIo {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry has any chance of succeeding
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientFetch { .. } | Self::RateLimited { .. } | Self::Network(_)
        )
    }
}

/// Result type alias for market data operations
pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = MarketError::InvalidSymbol("INVALID".to_string());
        assert_eq!(err.to_string(), "Invalid symbol: INVALID");

        let err = MarketError::InsufficientData {
            indicator: "rsi".to_string(),
            required: 15,
            available: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data for rsi: need 15 bars, have 5"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            MarketError::TransientFetch {
                provider: "yahoo".to_string(),
                reason: "timeout".to_string(),
            }
            .is_retryable()
        );
        assert!(
            MarketError::RateLimited {
                provider: "alpha_vantage".to_string()
            }
            .is_retryable()
        );

        assert!(!MarketError::Configuration("missing key".to_string()).is_retryable());
        assert!(!MarketError::InvalidSymbol("???".to_string()).is_retryable());
        assert!(!MarketError::Cancelled("fetch".to_string()).is_retryable());
    }

    #[test]
    fn test_retries_exhausted_wraps_last_failure() {
        let err = MarketError::RetriesExhausted {
            operation: "fetch ABC".to_string(),
            attempts: 4,
            source: Box::new(MarketError::RateLimited {
                provider: "yahoo".to_string(),
            }),
        };

        assert!(err.to_string().contains("after 4 attempts"));
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Rate limit exceeded for yahoo"));
    }
}
