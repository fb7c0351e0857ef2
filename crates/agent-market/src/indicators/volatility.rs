//! Bollinger bands and average true range

use super::{Lane, warmed_up};
use crate::model::Bar;
use ta::Next;
use ta::indicators::BollingerBands;

/// Middle, upper and lower band lanes
#[derive(Debug, Clone, PartialEq)]
pub struct BandLanes {
    pub middle: Lane,
    pub upper: Lane,
    pub lower: Lane,
}

/// Bollinger bands: SMA of `period` values `± width` population σ
pub fn bollinger(values: &[f64], period: usize, width: f64) -> BandLanes {
    let Ok(mut bands) = BollingerBands::new(period, width) else {
        let empty = vec![None; values.len()];
        return BandLanes {
            middle: empty.clone(),
            upper: empty.clone(),
            lower: empty,
        };
    };

    let outputs: Vec<_> = values.iter().map(|&value| bands.next(value)).collect();
    BandLanes {
        middle: warmed_up(outputs.iter().map(|o| o.average), period),
        upper: warmed_up(outputs.iter().map(|o| o.upper), period),
        lower: warmed_up(outputs.iter().map(|o| o.lower), period),
    }
}

/// True range of every bar; the first bar has no previous close and uses `high - low`
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut ranges = Vec::with_capacity(bars.len());
    let mut prev_close: Option<f64> = None;

    for bar in bars {
        let hl = bar.high - bar.low;
        let range = match prev_close {
            Some(prev) => hl.max((bar.high - prev).abs()).max((bar.low - prev).abs()),
            None => hl,
        };
        ranges.push(range);
        prev_close = Some(bar.close);
    }
    ranges
}
