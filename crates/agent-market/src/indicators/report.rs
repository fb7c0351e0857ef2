//! Plain-text rendering of indicator results for analyst prompts

use super::{IndicatorBatch, IndicatorKind};
use crate::model::{IndicatorSeries, ReportWindow};
use std::fmt::Write as _;

/// Text report over one symbol and window
#[derive(Debug, Clone)]
pub struct IndicatorReport {
    symbol: String,
    window: ReportWindow,
    sections: Vec<(IndicatorKind, IndicatorSeries)>,
    failures: Vec<(String, String)>,
}

impl IndicatorReport {
    pub fn new(symbol: impl Into<String>, window: ReportWindow) -> Self {
        Self {
            symbol: symbol.into(),
            window,
            sections: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Build a report from a batch, keeping the order of `kinds`
    pub fn from_batch(
        symbol: impl Into<String>,
        window: ReportWindow,
        kinds: &[IndicatorKind],
        batch: &IndicatorBatch,
    ) -> Self {
        let mut report = Self::new(symbol, window);
        for &kind in kinds {
            if let Some(series) = batch.get(kind) {
                report.push(kind, series.clone());
            }
        }
        report.failures = batch
            .failures
            .iter()
            .map(|f| (f.indicator.clone(), f.reason.clone()))
            .collect();
        report
    }

    pub fn push(&mut self, kind: IndicatorKind, series: IndicatorSeries) {
        self.sections.push((kind, series));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Technical indicators for {}", self.symbol);

        for (kind, series) in &self.sections {
            let _ = writeln!(
                out,
                "\n## {} values from {} to {}:\n",
                kind,
                self.window.start(),
                self.window.end()
            );
            if series.is_empty() {
                out.push_str("No values in this window (weekend or holiday?)\n");
            } else {
                out.push_str(&series.render());
            }
            let _ = writeln!(out, "\n{}", kind.description());
        }

        if !self.failures.is_empty() {
            out.push_str("\n## Unavailable indicators\n\n");
            for (indicator, reason) in &self.failures {
                let _ = writeln!(out, "- {indicator}: {reason}");
            }
        }

        out
    }
}

impl std::fmt::Display for IndicatorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorFailure;
    use crate::model::IndicatorPoint;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_render_sections_and_failures() {
        let window = ReportWindow::new(day(1), day(3)).unwrap();
        let mut batch = IndicatorBatch {
            attempted: 2,
            succeeded: 1,
            ..IndicatorBatch::default()
        };
        batch.results.insert(
            "rsi".to_string(),
            IndicatorSeries::new(
                "rsi",
                vec![IndicatorPoint {
                    date: day(2),
                    value: 64.25,
                }],
            ),
        );
        batch.failures.push(IndicatorFailure {
            indicator: "close_200_sma".to_string(),
            reason: "need 200 bars".to_string(),
        });

        let report = IndicatorReport::from_batch(
            "AAPL",
            window,
            &[IndicatorKind::Sma(200), IndicatorKind::Rsi],
            &batch,
        );
        let text = report.render();

        assert!(text.starts_with("# Technical indicators for AAPL\n"));
        assert!(text.contains("## rsi values from 2024-05-01 to 2024-05-03:\n\n2024-05-02: 64.25\n"));
        assert!(text.contains("relative strength index"));
        assert!(text.contains("- close_200_sma: need 200 bars"));
        assert!(!text.contains("## close_200_sma values"));
    }

    #[test]
    fn test_empty_window_note() {
        let window = ReportWindow::new(day(4), day(5)).unwrap();
        let mut report = IndicatorReport::new("AAPL", window);
        report.push(IndicatorKind::Atr, IndicatorSeries::new("atr", Vec::new()));

        assert!(report.render().contains("No values in this window"));
    }
}
