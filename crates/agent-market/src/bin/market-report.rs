//! Print a technical indicator report for one symbol
//!
//! # Usage
//!
//! ```bash
//! # Default indicator set over the last 30 days
//! cargo run --bin market-report -p agent-market -- AAPL
//!
//! # Chosen indicators, fixed end date, Alpha Vantage
//! export MARKET_PROVIDER=alpha_vantage ALPHA_VANTAGE_API_KEY=...
//! cargo run --bin market-report -p agent-market -- MSFT -i rsi -i macd --end 2024-06-28
//! ```

use agent_market::{
    DataProvider, IndicatorKind, MarketConfig, MarketDataService, ReportWindow, source,
};
use agent_utils::{LogFormat, init_tracing_with};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "market-report")]
#[command(about = "Technical indicator report for one symbol", long_about = None)]
struct Args {
    /// Ticker symbol, e.g. AAPL
    symbol: String,

    /// Calendar days before the end date to report
    #[arg(short, long, default_value_t = 30)]
    look_back_days: u32,

    /// Last day of the report (defaults to today, UTC)
    #[arg(short, long)]
    end: Option<NaiveDate>,

    /// Indicator name (repeatable), e.g. rsi, macd, close_50_sma
    #[arg(short, long = "indicator")]
    indicators: Vec<String>,

    /// Override MARKET_PROVIDER (yahoo, alpha_vantage)
    #[arg(short, long)]
    provider: Option<DataProvider>,

    /// Bypass every cache
    #[arg(long)]
    no_cache: bool,

    /// Purge expired cache files before running
    #[arg(long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing_with("warn,agent_market=info", LogFormat::from_env());

    let args = Args::parse();

    let mut config = MarketConfig::from_env().context("Invalid market configuration")?;
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if args.no_cache {
        config.cache_enabled = false;
    }

    let kinds = args
        .indicators
        .iter()
        .map(|name| name.parse::<IndicatorKind>())
        .collect::<Result<Vec<_>, _>>()?;

    let source = source::from_config(&config)?;
    let service = MarketDataService::from_config(&config, source)?;

    if args.cleanup && config.cache_enabled {
        let now = Utc::now();
        let expired = service.indicator_cache().purge_expired().await?;
        let stale = service
            .series_cache()
            .store()
            .purge_older_than(config.durable_staleness, now)
            .await?;
        info!("Removed {} expired indicator files, {} stale series files", expired, stale);
    }

    let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
    let window = ReportWindow::trailing(end, args.look_back_days);

    let report = if kinds.is_empty() {
        service.indicator_report(&args.symbol, &window).await?
    } else {
        service
            .indicator_report_with(&args.symbol, &window, &kinds)
            .await?
    };

    print!("{report}");

    // let queued cache writes land before the runtime shuts down
    service.series_cache().flush().await;
    Ok(())
}
