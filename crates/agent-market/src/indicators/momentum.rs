//! Bounded momentum oscillators

use super::Lane;
use crate::model::Bar;

/// Wilder-smoothed RSI
///
/// The first value sits at index `period`: the seed averages need `period`
/// price changes.
pub fn rsi(closes: &[f64], period: usize) -> Lane {
    let mut lane = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return lane;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let n = period as f64;

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;
    lane[period] = Some(rsi_value(avg_gain, avg_loss));

    for (offset, &change) in changes.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
        lane[offset + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    lane
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Money flow index over `period` typical-price moves
pub fn mfi(bars: &[Bar], period: usize) -> Lane {
    let mut lane = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return lane;
    }

    // (positive, negative) raw money flow of each bar against the previous one
    let flows: Vec<(f64, f64)> = bars
        .windows(2)
        .map(|w| {
            let prev = w[0].typical_price();
            let tp = w[1].typical_price();
            let raw = tp * w[1].volume as f64;
            if tp > prev {
                (raw, 0.0)
            } else if tp < prev {
                (0.0, raw)
            } else {
                (0.0, 0.0)
            }
        })
        .collect();

    for (offset, window) in flows.windows(period).enumerate() {
        let positive: f64 = window.iter().map(|f| f.0).sum();
        let negative: f64 = window.iter().map(|f| f.1).sum();
        let value = if negative == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + positive / negative)
        };
        lane[offset + period] = Some(value);
    }
    lane
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(i: usize, price: f64, volume: u64) -> Bar {
        Bar {
            symbol: "T".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64),
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    #[test]
    fn test_rsi_first_value_position() {
        let closes: Vec<f64> = (0..5).map(f64::from).collect();
        let lane = rsi(&closes, 3);
        assert_eq!(lane[..3].iter().filter(|v| v.is_some()).count(), 0);
        assert_eq!(lane[3], Some(100.0));
        assert_eq!(lane[4], Some(100.0));
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // changes: +1, -1, +2, then -2
        let lane = rsi(&[10.0, 11.0, 10.0, 12.0, 10.0], 3);
        // seed: gain 1.0, loss 1/3
        assert!((lane[3].unwrap() - 75.0).abs() < 1e-9);
        // gain 2/3, loss (2/3 + 2)/3 = 8/9
        let expected = 100.0 - 100.0 / (1.0 + (2.0 / 3.0) / (8.0 / 9.0));
        assert!((lane[4].unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let lane = rsi(&[5.0, 4.0, 3.0, 2.0], 3);
        assert_eq!(lane[3], Some(0.0));
    }

    #[test]
    fn test_mfi_classifies_flows() {
        let bars = vec![bar(0, 10.0, 100), bar(1, 11.0, 100), bar(2, 10.0, 50), bar(3, 10.0, 70)];
        let lane = mfi(&bars, 3);

        assert!(lane[..3].iter().all(Option::is_none));
        // positive 1100, negative 500, last move is neutral
        let expected = 100.0 - 100.0 / (1.0 + 1100.0 / 500.0);
        assert!((lane[3].unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_mfi_no_negative_flow_is_100() {
        let bars: Vec<Bar> = (0..4).map(|i| bar(i, 10.0 + i as f64, 10)).collect();
        assert_eq!(mfi(&bars, 3)[3], Some(100.0));
    }
}
