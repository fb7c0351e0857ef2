//! OHLCV bars, series and indicator output types

use crate::error::{MarketError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// One trading day for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Typical price `(high + low + close) / 3`
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Daily bars for one symbol, strictly ascending by date
///
/// A `Series` is never mutated once built; a later fetch produces a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    symbol: String,
    bars: Vec<Bar>,
}

impl Series {
    /// Build a series from provider output
    ///
    /// Bars are sorted by date; for a repeated date the bar that came last
    /// wins. Bars tagged with another symbol are rejected.
    pub fn new(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Result<Self> {
        let symbol = symbol.into();

        if let Some(stray) = bars.iter().find(|b| b.symbol != symbol) {
            return Err(MarketError::InvalidSeries {
                symbol,
                reason: format!("bar dated {} belongs to {}", stray.date, stray.symbol),
            });
        }

        // stable sort keeps provider order within a date
        bars.sort_by_key(|b| b.date);
        let mut deduped: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => deduped.push(bar),
            }
        }

        Ok(Self {
            symbol,
            bars: deduped,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// The `count` most recent bars (all of them if shorter)
    pub fn tail(&self, count: usize) -> Self {
        let skip = self.bars.len().saturating_sub(count);
        Self {
            symbol: self.symbol.clone(),
            bars: self.bars[skip..].to_vec(),
        }
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Closing prices in date order
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }
}

impl Deref for Series {
    type Target = [Bar];

    fn deref(&self) -> &Self::Target {
        &self.bars
    }
}

/// Inclusive calendar-day range an indicator is reported over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl ReportWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(MarketError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `look_back_days` calendar days up to and including `end`
    pub fn trailing(end: NaiveDate, look_back_days: u32) -> Self {
        Self {
            start: end - Duration::days(i64::from(look_back_days)),
            end,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Calendar days from `start` through `end`, inclusive
    pub fn calendar_days(&self) -> u32 {
        u32::try_from((self.end - self.start).num_days() + 1).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

/// One computed indicator value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Indicator values for the dates whose lookback is satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub name: String,
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn new(name: impl Into<String>, points: Vec<IndicatorPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<IndicatorPoint> {
        self.points.last().copied()
    }

    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .map(|idx| self.points[idx].value)
    }

    /// Keep only the points inside `window`
    pub fn restrict_to(mut self, window: &ReportWindow) -> Self {
        self.points.retain(|p| window.contains(p.date));
        self
    }

    /// `"<date>: <value>"`, one line per point, oldest first
    pub fn render(&self) -> String {
        self.points
            .iter()
            .map(|p| format!("{}: {}\n", p.date, format_value(p.value)))
            .collect()
    }
}

/// Four decimals with trailing zeros trimmed
fn format_value(value: f64) -> String {
    let fixed = format!("{value:.4}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn bar(symbol: &str, d: u32, close: f64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            date: day(d),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn test_series_sorts_and_dedupes() {
        let series = Series::new(
            "ABC",
            vec![bar("ABC", 3, 3.0), bar("ABC", 1, 1.0), bar("ABC", 3, 30.0)],
        )
        .unwrap();

        let dates: Vec<_> = series.iter().map(|b| b.date).collect();
        assert_eq!(dates, vec![day(1), day(3)]);
        assert_eq!(series.closes(), vec![1.0, 30.0]);
    }

    #[test]
    fn test_series_rejects_foreign_symbol() {
        let err = Series::new("ABC", vec![bar("XYZ", 1, 1.0)]).unwrap_err();
        assert!(matches!(err, MarketError::InvalidSeries { .. }));
    }

    #[test]
    fn test_series_tail_keeps_most_recent() {
        let bars = (1..=5).map(|d| bar("ABC", d, f64::from(d))).collect();
        let series = Series::new("ABC", bars).unwrap();

        let tail = series.tail(2);
        assert_eq!(tail.closes(), vec![4.0, 5.0]);
        assert_eq!(series.tail(10).len(), 5);
    }

    #[test]
    fn test_window_validation() {
        assert!(ReportWindow::new(day(5), day(1)).is_err());

        let window = ReportWindow::new(day(1), day(5)).unwrap();
        assert!(window.contains(day(1)));
        assert!(window.contains(day(5)));
        assert!(!window.contains(day(6)));
        assert_eq!(window.calendar_days(), 5);

        let trailing = ReportWindow::trailing(day(10), 7);
        assert_eq!(trailing.start(), day(3));
        assert_eq!(trailing.to_string(), "2024-03-03 to 2024-03-10");
    }

    #[test]
    fn test_indicator_series_render() {
        let series = IndicatorSeries::new(
            "rsi",
            vec![
                IndicatorPoint {
                    date: day(1),
                    value: 55.5,
                },
                IndicatorPoint {
                    date: day(2),
                    value: 61.234_56,
                },
                IndicatorPoint {
                    date: day(3),
                    value: 100.0,
                },
            ],
        );

        assert_eq!(
            series.render(),
            "2024-03-01: 55.5\n2024-03-02: 61.2346\n2024-03-03: 100\n"
        );
        assert_eq!(series.value_at(day(2)), Some(61.234_56));
        assert_eq!(series.value_at(day(9)), None);
    }
}
