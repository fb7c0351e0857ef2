//! Technical indicator engine
//!
//! Every indicator is computed over the whole series as a *lane*: one
//! optional value per bar, absent until the lookback is satisfied. Lanes are
//! memoised per call, so dependency chains such as
//! `macdh -> macds -> macd -> EMA(12), EMA(26)` compute each link once.
//! Only at the end is a lane turned into an [`IndicatorSeries`] restricted to
//! the reporting window.

pub mod momentum;
pub mod moving_average;
pub mod report;
pub mod volatility;

pub use report::IndicatorReport;

use crate::error::{MarketError, Result};
use crate::model::{IndicatorPoint, IndicatorSeries, ReportWindow, Series};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use tracing::debug;

/// One optional value per bar of the source series
pub type Lane = Vec<Option<f64>>;

const RSI_PERIOD: usize = 14;
const MFI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const VWMA_PERIOD: usize = 20;
const BOLL_PERIOD: usize = 20;
const BOLL_WIDTH: f64 = 2.0;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

/// Supported indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorKind {
    Sma(usize),
    Ema(usize),
    Macd,
    MacdSignal,
    MacdHistogram,
    Rsi,
    BollingerMiddle,
    BollingerUpper,
    BollingerLower,
    Atr,
    Vwma,
    Mfi,
}

impl IndicatorKind {
    /// The set reported when the caller does not choose
    pub const DEFAULT_SET: [IndicatorKind; 13] = [
        Self::Sma(50),
        Self::Sma(200),
        Self::Ema(10),
        Self::Macd,
        Self::MacdSignal,
        Self::MacdHistogram,
        Self::Rsi,
        Self::BollingerMiddle,
        Self::BollingerUpper,
        Self::BollingerLower,
        Self::Atr,
        Self::Vwma,
        Self::Mfi,
    ];

    /// Stable textual name, also used as cache method and report heading
    pub fn name(&self) -> String {
        match self {
            Self::Sma(p) => format!("close_{p}_sma"),
            Self::Ema(p) => format!("close_{p}_ema"),
            Self::Macd => "macd".to_string(),
            Self::MacdSignal => "macds".to_string(),
            Self::MacdHistogram => "macdh".to_string(),
            Self::Rsi => "rsi".to_string(),
            Self::BollingerMiddle => "boll".to_string(),
            Self::BollingerUpper => "boll_ub".to_string(),
            Self::BollingerLower => "boll_lb".to_string(),
            Self::Atr => "atr".to_string(),
            Self::Vwma => "vwma".to_string(),
            Self::Mfi => "mfi".to_string(),
        }
    }

    /// Fewest bars that yield at least one value
    pub fn min_bars(&self) -> usize {
        match self {
            Self::Sma(p) | Self::Ema(p) => *p,
            Self::Macd => MACD_SLOW,
            Self::MacdSignal | Self::MacdHistogram => MACD_SLOW + MACD_SIGNAL - 1,
            Self::Rsi => RSI_PERIOD + 1,
            Self::BollingerMiddle | Self::BollingerUpper | Self::BollingerLower => BOLL_PERIOD,
            Self::Atr => ATR_PERIOD,
            Self::Vwma => VWMA_PERIOD,
            Self::Mfi => MFI_PERIOD + 1,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Sma(p) => format!(
                "{p}-day simple moving average of the close. Trend direction; price above the \
                 average leans bullish, below leans bearish."
            ),
            Self::Ema(p) => format!(
                "{p}-day exponential moving average of the close. Reacts faster than the SMA; \
                 useful for short-term momentum shifts."
            ),
            Self::Macd => "MACD line, EMA(12) minus EMA(26). Crossings of zero mark trend \
                           changes."
                .to_string(),
            Self::MacdSignal => "MACD signal line, EMA(9) of the MACD. MACD crossing above it \
                                 is a bullish trigger, crossing below a bearish one."
                .to_string(),
            Self::MacdHistogram => "MACD histogram, MACD minus signal. Growing bars show \
                                    strengthening momentum."
                .to_string(),
            Self::Rsi => "14-day relative strength index (Wilder). Above 70 is overbought, \
                          below 30 oversold."
                .to_string(),
            Self::BollingerMiddle => "Bollinger middle band, the 20-day SMA of the close."
                .to_string(),
            Self::BollingerUpper => "Bollinger upper band, middle plus two standard \
                                     deviations. Touches suggest stretched prices."
                .to_string(),
            Self::BollingerLower => "Bollinger lower band, middle minus two standard \
                                     deviations. Touches suggest oversold conditions."
                .to_string(),
            Self::Atr => "14-day average true range, a plain rolling mean. Higher values mean \
                          wider daily swings; useful for stop placement."
                .to_string(),
            Self::Vwma => "20-day volume-weighted moving average of the close. Confirms \
                           trends with volume."
                .to_string(),
            Self::Mfi => "14-day money flow index, a volume-weighted RSI. Above 80 is \
                          overbought, below 20 oversold."
                .to_string(),
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for IndicatorKind {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        let kind = match name.as_str() {
            "macd" => Self::Macd,
            "macds" => Self::MacdSignal,
            "macdh" => Self::MacdHistogram,
            "rsi" => Self::Rsi,
            "boll" => Self::BollingerMiddle,
            "boll_ub" => Self::BollingerUpper,
            "boll_lb" => Self::BollingerLower,
            "atr" => Self::Atr,
            "vwma" => Self::Vwma,
            "mfi" => Self::Mfi,
            other => return parse_moving_average(other),
        };
        Ok(kind)
    }
}

/// `close_<period>_sma` or `close_<period>_ema`
fn parse_moving_average(name: &str) -> Result<IndicatorKind> {
    let unsupported = || MarketError::UnsupportedIndicator(name.to_string());

    let rest = name.strip_prefix("close_").ok_or_else(unsupported)?;
    let (period, average) = rest.split_once('_').ok_or_else(unsupported)?;
    let period: usize = period.parse().map_err(|_| unsupported())?;
    if period == 0 {
        return Err(unsupported());
    }

    match average {
        "sma" => Ok(IndicatorKind::Sma(period)),
        "ema" => Ok(IndicatorKind::Ema(period)),
        _ => Err(unsupported()),
    }
}

impl Serialize for IndicatorKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for IndicatorKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Why one indicator of a batch produced nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorFailure {
    pub indicator: String,
    pub reason: String,
}

/// Outcome of computing several indicators over one series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBatch {
    pub results: BTreeMap<String, IndicatorSeries>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<IndicatorFailure>,
}

impl IndicatorBatch {
    pub fn get(&self, kind: IndicatorKind) -> Option<&IndicatorSeries> {
        self.results.get(&kind.name())
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

/// Intermediate results shared between the indicators of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LaneKey {
    Sma(usize),
    Ema(usize),
    Macd,
    MacdSignal,
    MacdHistogram,
    BollingerMiddle,
    BollingerUpper,
    BollingerLower,
    Atr,
    Rsi,
    Vwma,
    Mfi,
}

struct Workspace<'a> {
    series: &'a Series,
    closes: Vec<f64>,
    lanes: HashMap<LaneKey, Rc<Lane>>,
}

impl<'a> Workspace<'a> {
    fn new(series: &'a Series) -> Self {
        Self {
            series,
            closes: series.closes(),
            lanes: HashMap::new(),
        }
    }

    fn lane_for(&mut self, kind: IndicatorKind) -> Rc<Lane> {
        let key = match kind {
            IndicatorKind::Sma(p) => LaneKey::Sma(p),
            IndicatorKind::Ema(p) => LaneKey::Ema(p),
            IndicatorKind::Macd => LaneKey::Macd,
            IndicatorKind::MacdSignal => LaneKey::MacdSignal,
            IndicatorKind::MacdHistogram => LaneKey::MacdHistogram,
            IndicatorKind::Rsi => LaneKey::Rsi,
            IndicatorKind::BollingerMiddle => LaneKey::BollingerMiddle,
            IndicatorKind::BollingerUpper => LaneKey::BollingerUpper,
            IndicatorKind::BollingerLower => LaneKey::BollingerLower,
            IndicatorKind::Atr => LaneKey::Atr,
            IndicatorKind::Vwma => LaneKey::Vwma,
            IndicatorKind::Mfi => LaneKey::Mfi,
        };
        self.lane(key)
    }

    fn lane(&mut self, key: LaneKey) -> Rc<Lane> {
        if let Some(lane) = self.lanes.get(&key) {
            return lane.clone();
        }

        let lane = match key {
            LaneKey::Sma(p) => moving_average::sma(&self.closes, p),
            LaneKey::Ema(p) => moving_average::ema(&self.closes, p),
            LaneKey::Macd => {
                let fast = self.lane(LaneKey::Ema(MACD_FAST));
                let slow = self.lane(LaneKey::Ema(MACD_SLOW));
                join(&fast, &slow, |f, s| f - s)
            }
            LaneKey::MacdSignal => {
                let macd = self.lane(LaneKey::Macd);
                moving_average::ema_of_lane(&macd, MACD_SIGNAL)
            }
            LaneKey::MacdHistogram => {
                let macd = self.lane(LaneKey::Macd);
                let signal = self.lane(LaneKey::MacdSignal);
                let histogram = join(&macd, &signal, |m, s| m - s);
                let dropped = macd.iter().flatten().count() - histogram.iter().flatten().count();
                if dropped > 0 {
                    debug!("macdh: {} MACD dates have no signal value yet", dropped);
                }
                histogram
            }
            LaneKey::BollingerMiddle | LaneKey::BollingerUpper | LaneKey::BollingerLower => {
                // one pass fills all three bands
                let bands = volatility::bollinger(&self.closes, BOLL_PERIOD, BOLL_WIDTH);
                let middle = Rc::new(bands.middle);
                let upper = Rc::new(bands.upper);
                let lower = Rc::new(bands.lower);
                self.lanes.insert(LaneKey::BollingerMiddle, middle.clone());
                self.lanes.insert(LaneKey::BollingerUpper, upper.clone());
                self.lanes.insert(LaneKey::BollingerLower, lower.clone());
                return match key {
                    LaneKey::BollingerUpper => upper,
                    LaneKey::BollingerLower => lower,
                    _ => middle,
                };
            }
            LaneKey::Atr => moving_average::sma(&volatility::true_range(self.series), ATR_PERIOD),
            LaneKey::Rsi => momentum::rsi(&self.closes, RSI_PERIOD),
            LaneKey::Vwma => moving_average::vwma(self.series, VWMA_PERIOD),
            LaneKey::Mfi => momentum::mfi(self.series, MFI_PERIOD),
        };

        let lane = Rc::new(lane);
        self.lanes.insert(key, lane.clone());
        lane
    }

    fn to_indicator(&self, kind: IndicatorKind, lane: &Lane, window: &ReportWindow) -> IndicatorSeries {
        let points = self
            .series
            .iter()
            .zip(lane)
            .filter_map(|(bar, value)| {
                value.map(|value| IndicatorPoint {
                    date: bar.date,
                    value,
                })
            })
            .collect();
        IndicatorSeries::new(kind.name(), points).restrict_to(window)
    }
}

/// Lane from a streaming indicator's outputs, absent before the first full window
pub(crate) fn warmed_up(outputs: impl Iterator<Item = f64>, period: usize) -> Lane {
    outputs
        .enumerate()
        .map(|(idx, value)| (idx + 1 >= period).then_some(value))
        .collect()
}

/// Element-wise combination where both lanes have a value
fn join(a: &Lane, b: &Lane, f: impl Fn(f64, f64) -> f64) -> Lane {
    a.iter()
        .zip(b)
        .map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) => Some(f(*a, *b)),
            _ => None,
        })
        .collect()
}

/// Computes indicators over a bar series
///
/// Stateless apart from its default indicator set; safe to share across
/// tasks and symbols.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    kinds: Vec<IndicatorKind>,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self {
            kinds: IndicatorKind::DEFAULT_SET.to_vec(),
        }
    }

    /// Engine whose `calculate_all` covers `kinds` instead of the default set
    pub fn with_kinds(kinds: Vec<IndicatorKind>) -> Self {
        Self { kinds }
    }

    pub fn kinds(&self) -> &[IndicatorKind] {
        &self.kinds
    }

    /// Compute one indicator and restrict it to `window`
    pub fn calculate(
        &self,
        kind: IndicatorKind,
        series: &Series,
        window: &ReportWindow,
    ) -> Result<IndicatorSeries> {
        let mut workspace = Workspace::new(series);
        compute(&mut workspace, kind, window)
    }

    /// Compute every indicator in `kinds`; failures are collected, not raised
    pub fn calculate_many(
        &self,
        kinds: &[IndicatorKind],
        series: &Series,
        window: &ReportWindow,
    ) -> IndicatorBatch {
        let mut workspace = Workspace::new(series);
        let mut batch = IndicatorBatch {
            attempted: kinds.len(),
            ..IndicatorBatch::default()
        };

        for &kind in kinds {
            match compute(&mut workspace, kind, window) {
                Ok(result) => {
                    batch.succeeded += 1;
                    batch.results.insert(kind.name(), result);
                }
                Err(e) => {
                    debug!("Skipping {} for {}: {}", kind, series.symbol(), e);
                    batch.failures.push(IndicatorFailure {
                        indicator: kind.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Computed {}/{} indicators for {}",
            batch.succeeded,
            batch.attempted,
            series.symbol()
        );
        batch
    }

    /// Compute the engine's indicator set
    pub fn calculate_all(&self, series: &Series, window: &ReportWindow) -> IndicatorBatch {
        self.calculate_many(&self.kinds, series, window)
    }
}

fn compute(workspace: &mut Workspace<'_>, kind: IndicatorKind, window: &ReportWindow) -> Result<IndicatorSeries> {
    let required = kind.min_bars();
    if required == 0 {
        return Err(MarketError::UnsupportedIndicator(kind.name()));
    }

    let available = workspace.series.len();
    if available < required {
        return Err(MarketError::InsufficientData {
            indicator: kind.name(),
            required,
            available,
        });
    }

    let lane = workspace.lane_for(kind);
    Ok(workspace.to_indicator(kind, &lane, window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bar;
    use chrono::NaiveDate;

    fn day(i: usize) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64)
    }

    fn series_of(closes: &[f64]) -> Series {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "ABC".to_string(),
                date: day(i),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000 + i as u64,
            })
            .collect();
        Series::new("ABC", bars).unwrap()
    }

    fn everything(series: &Series) -> ReportWindow {
        ReportWindow::new(day(0), day(series.len())).unwrap()
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in IndicatorKind::DEFAULT_SET {
            assert_eq!(kind.name().parse::<IndicatorKind>().unwrap(), kind);
        }
        assert_eq!("close_30_ema".parse::<IndicatorKind>().unwrap(), IndicatorKind::Ema(30));
        assert_eq!(" RSI ".parse::<IndicatorKind>().unwrap(), IndicatorKind::Rsi);
    }

    #[test]
    fn test_kind_rejects_unknown() {
        for bad in ["stoch", "close_0_sma", "close_x_sma", "close_10_wma", "close_10"] {
            let err = bad.parse::<IndicatorKind>().unwrap_err();
            assert!(matches!(err, MarketError::UnsupportedIndicator(_)), "{bad}");
        }
    }

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&IndicatorKind::Sma(50)).unwrap();
        assert_eq!(json, "\"close_50_sma\"");
        let back: IndicatorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, IndicatorKind::Sma(50));
    }

    #[test]
    fn test_insufficient_data() {
        let series = series_of(&[1.0; 10]);
        let err = IndicatorEngine::new()
            .calculate(IndicatorKind::Sma(50), &series, &everything(&series))
            .unwrap_err();

        match err {
            MarketError::InsufficientData {
                indicator,
                required,
                available,
            } => {
                assert_eq!(indicator, "close_50_sma");
                assert_eq!(required, 50);
                assert_eq!(available, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_window_restricts_points() {
        let closes: Vec<f64> = (0..30).map(|i| f64::from(i) + 1.0).collect();
        let series = series_of(&closes);
        let window = ReportWindow::new(day(25), day(27)).unwrap();

        let sma = IndicatorEngine::new()
            .calculate(IndicatorKind::Sma(5), &series, &window)
            .unwrap();

        let dates: Vec<_> = sma.points.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(25), day(26), day(27)]);
        // mean of closes 22..=26
        assert_eq!(sma.value_at(day(25)), Some(24.0));
    }

    #[test]
    fn test_first_value_dates_follow_lookback() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + f64::from(i % 7)).collect();
        let series = series_of(&closes);
        let window = everything(&series);
        let batch = IndicatorEngine::new().calculate_many(
            &[
                IndicatorKind::Macd,
                IndicatorKind::MacdSignal,
                IndicatorKind::MacdHistogram,
                IndicatorKind::Rsi,
                IndicatorKind::Atr,
                IndicatorKind::Mfi,
            ],
            &series,
            &window,
        );

        assert!(batch.is_complete());
        let first = |kind| batch.get(kind).unwrap().points[0].date;
        assert_eq!(first(IndicatorKind::Macd), day(25));
        assert_eq!(first(IndicatorKind::MacdSignal), day(33));
        assert_eq!(first(IndicatorKind::MacdHistogram), day(33));
        assert_eq!(first(IndicatorKind::Rsi), day(14));
        assert_eq!(first(IndicatorKind::Atr), day(13));
        assert_eq!(first(IndicatorKind::Mfi), day(14));
    }

    #[test]
    fn test_batch_collects_failures() {
        let series = series_of(&[10.0, 12.0, 11.0, 13.0, 14.0]);
        let batch = IndicatorEngine::new().calculate_all(&series, &everything(&series));

        assert_eq!(batch.attempted, IndicatorKind::DEFAULT_SET.len());
        assert_eq!(batch.succeeded, 0);
        assert_eq!(batch.failures.len(), batch.attempted);
        assert!(batch.results.is_empty());
        assert!(!batch.is_complete());
    }

    #[test]
    fn test_with_kinds_limits_calculate_all() {
        let series = series_of(&[10.0, 12.0, 11.0, 13.0, 14.0]);
        let engine = IndicatorEngine::with_kinds(vec![IndicatorKind::Sma(3), IndicatorKind::Rsi]);
        let batch = engine.calculate_all(&series, &everything(&series));

        assert_eq!(batch.attempted, 2);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(
            batch.get(IndicatorKind::Sma(3)).unwrap().value_at(day(2)),
            Some(11.0)
        );
        assert_eq!(batch.failures[0].indicator, "rsi");
    }

    #[test]
    fn test_bollinger_middle_tracks_sma() {
        let closes: Vec<f64> = (0..40).map(|i| 50.0 + f64::from(i % 9) * 1.5).collect();
        let series = series_of(&closes);
        let batch = IndicatorEngine::new().calculate_many(
            &[
                IndicatorKind::Sma(20),
                IndicatorKind::BollingerMiddle,
                IndicatorKind::BollingerUpper,
                IndicatorKind::BollingerLower,
            ],
            &series,
            &everything(&series),
        );

        let sma = batch.get(IndicatorKind::Sma(20)).unwrap();
        let middle = batch.get(IndicatorKind::BollingerMiddle).unwrap();
        let upper = batch.get(IndicatorKind::BollingerUpper).unwrap();
        let lower = batch.get(IndicatorKind::BollingerLower).unwrap();

        assert_eq!(middle.len(), 21);
        assert_eq!(middle.points[0].date, day(19));
        for (m, s) in middle.points.iter().zip(&sma.points) {
            assert_eq!(m.date, s.date);
            assert!((m.value - s.value).abs() < 1e-9);
        }
        // symmetric around the middle
        for point in &middle.points {
            let ub = upper.value_at(point.date).unwrap();
            let lb = lower.value_at(point.date).unwrap();
            assert!(((ub - point.value) - (point.value - lb)).abs() < 1e-9);
        }
    }
}
