//! Simple, exponential and volume-weighted moving averages

use super::{Lane, warmed_up};
use crate::model::Bar;
use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// Mean of the trailing `period` values
pub fn sma(values: &[f64], period: usize) -> Lane {
    let Ok(mut average) = SimpleMovingAverage::new(period) else {
        return vec![None; values.len()];
    };
    warmed_up(values.iter().map(|&value| average.next(value)), period)
}

/// EMA seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Lane {
    let mut lane = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return lane;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    lane[period - 1] = Some(prev);

    for (idx, &value) in values.iter().enumerate().skip(period) {
        prev = value * k + prev * (1.0 - k);
        lane[idx] = Some(prev);
    }
    lane
}

/// EMA over the present values of a lane, written back to their positions
///
/// Used for derived series (the MACD signal line) whose first values are
/// absent.
pub fn ema_of_lane(input: &Lane, period: usize) -> Lane {
    let (positions, values): (Vec<usize>, Vec<f64>) = input
        .iter()
        .enumerate()
        .filter_map(|(idx, v)| v.map(|v| (idx, v)))
        .unzip();

    let mut lane = vec![None; input.len()];
    for (idx, value) in positions.into_iter().zip(ema(&values, period)) {
        lane[idx] = value;
    }
    lane
}

/// `Σ(close * volume) / Σ(volume)` over the trailing `period` bars
///
/// A window with no volume at all yields `0`.
pub fn vwma(bars: &[Bar], period: usize) -> Lane {
    let mut lane = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return lane;
    }

    for (end, window) in (period - 1..).zip(bars.windows(period)) {
        let volume: f64 = window.iter().map(|b| b.volume as f64).sum();
        let weighted: f64 = window.iter().map(|b| b.close * b.volume as f64).sum();
        lane[end] = Some(if volume == 0.0 { 0.0 } else { weighted / volume });
    }
    lane
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars(closes: &[f64], volumes: &[u64]) -> Vec<Bar> {
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| Bar {
                symbol: "T".to_string(),
                date: first + chrono::Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_sma_warm_up_is_absent() {
        let lane = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(lane, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_sma_short_input() {
        assert_eq!(sma(&[1.0, 2.0], 3), vec![None, None]);
        assert_eq!(sma(&[1.0], 0), vec![None]);
    }

    #[test]
    fn test_ema_seed_and_step() {
        // k = 0.5 for period 3
        let lane = ema(&[1.0, 2.0, 3.0, 7.0], 3);
        assert!(lane[..2].iter().all(Option::is_none));
        assert_eq!(lane[2], Some(2.0));
        assert_eq!(lane[3], Some(4.5));
    }

    #[test]
    fn test_ema_of_lane_skips_leading_gaps() {
        let input = vec![None, None, Some(1.0), Some(2.0), Some(3.0), Some(7.0)];
        let lane = ema_of_lane(&input, 3);
        assert_eq!(lane, vec![None, None, None, None, Some(2.0), Some(4.5)]);
    }

    #[test]
    fn test_vwma_weights_by_volume() {
        let lane = vwma(&bars(&[10.0, 20.0], &[1, 3]), 2);
        assert_eq!(lane, vec![None, Some(17.5)]);
    }

    #[test]
    fn test_vwma_zero_volume_is_zero() {
        let lane = vwma(&bars(&[10.0, 20.0, 30.0], &[0, 0, 0]), 2);
        assert_eq!(lane, vec![None, Some(0.0), Some(0.0)]);
    }
}
