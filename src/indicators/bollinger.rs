#![allow(dead_code)]
use rust_decimal::Decimal;

use crate::types::Candle;

use super::{sma, stddev};

pub const DEFAULT_BB_PERIOD: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct BollingerResult {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
    /// Position of the latest typical price within the bands, 0 = lower band.
    pub percent_b: Option<Decimal>,
}

/// Bollinger Bands over typical price: rolling mean +/- `multiplier` stddev.
pub fn bollinger(candles: &[Candle], period: usize, multiplier: Decimal) -> Option<BollingerResult> {
    if candles.len() < period {
        return None;
    }
    let prices: Vec<Decimal> = candles.iter().map(|c| c.typical_price()).collect();
    let middle = sma(&prices, period)?;
    let deviation = stddev(&prices, period)? * multiplier;
    let upper = middle + deviation;
    let lower = middle - deviation;

    let band_range = upper - lower;
    let percent_b = if band_range.is_zero() {
        None
    } else {
        prices.last().map(|p| (*p - lower) / band_range)
    };

    Some(BollingerResult {
        upper,
        middle,
        lower,
        percent_b,
    })
}

/// Per-candle band series for chart overlays. The first `period - 1` slots
/// are undefined and emitted as `None`, never as zero.
pub fn bollinger_series(
    candles: &[Candle],
    period: usize,
    multiplier: Decimal,
) -> (Vec<Option<Decimal>>, Vec<Option<Decimal>>) {
    let mut upper = Vec::with_capacity(candles.len());
    let mut lower = Vec::with_capacity(candles.len());

    for i in 0..candles.len() {
        if i + 1 < period {
            upper.push(None);
            lower.push(None);
            continue;
        }
        match bollinger(&candles[..=i], period, multiplier) {
            Some(bands) => {
                upper.push(Some(bands.upper));
                lower.push(Some(bands.lower));
            }
            None => {
                upper.push(None);
                lower.push(None);
            }
        }
    }
    (upper, lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(i: i64, price: Decimal) -> Candle {
        Candle::new(
            Utc.timestamp_opt(i * 900, 0).unwrap(),
            price,
            price,
            price,
            price,
            dec!(1),
        )
    }

    #[test]
    fn constant_prices_collapse_bands() {
        let candles: Vec<Candle> = (0..25).map(|i| candle(i, dec!(100))).collect();
        let bands = bollinger(&candles, 20, dec!(2)).unwrap();
        assert_eq!(bands.upper, dec!(100));
        assert_eq!(bands.middle, dec!(100));
        assert_eq!(bands.lower, dec!(100));
        assert!(bands.percent_b.is_none());
    }

    #[test]
    fn short_window_is_none() {
        let candles: Vec<Candle> = (0..19).map(|i| candle(i, dec!(100))).collect();
        assert!(bollinger(&candles, 20, dec!(2)).is_none());
    }

    #[test]
    fn series_pads_warmup_with_none() {
        let candles: Vec<Candle> = (0..30).map(|i| candle(i, Decimal::from(100 + i))).collect();
        let (upper, lower) = bollinger_series(&candles, 20, dec!(2));
        assert_eq!(upper.len(), 30);
        assert!(upper[..19].iter().all(|v| v.is_none()));
        assert!(upper[19].is_some());
        assert!(lower[29].is_some());
        let band = upper[29].unwrap() - lower[29].unwrap();
        assert!(band > Decimal::ZERO);
    }
}
