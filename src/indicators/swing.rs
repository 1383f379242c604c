#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::Candle;

pub const DEFAULT_SWING_LOOKBACK: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct SwingPoint {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

/// A bar is a swing high iff its high strictly exceeds the highs of the
/// `lookback` bars on each side.
pub fn is_swing_high(candles: &[Candle], index: usize, lookback: usize) -> bool {
    if lookback == 0 || index < lookback || index + lookback >= candles.len() {
        return false;
    }
    let pivot = candles[index].high;
    let before = &candles[index - lookback..index];
    let after = &candles[index + 1..=index + lookback];
    before.iter().all(|c| c.high < pivot) && after.iter().all(|c| c.high < pivot)
}

pub fn is_swing_low(candles: &[Candle], index: usize, lookback: usize) -> bool {
    if lookback == 0 || index < lookback || index + lookback >= candles.len() {
        return false;
    }
    let pivot = candles[index].low;
    let before = &candles[index - lookback..index];
    let after = &candles[index + 1..=index + lookback];
    before.iter().all(|c| c.low > pivot) && after.iter().all(|c| c.low > pivot)
}

/// Most recent confirmed swing high no older than `max_age` bars, walking
/// from newest to oldest.
pub fn find_recent_swing_high(
    candles: &[Candle],
    lookback: usize,
    max_age: usize,
) -> Option<SwingPoint> {
    let len = candles.len();
    if len < 2 * lookback + 1 {
        return None;
    }
    let newest = len - 1 - lookback;
    let oldest = newest.saturating_sub(max_age);
    for index in (oldest..=newest).rev() {
        if is_swing_high(candles, index, lookback) {
            return Some(SwingPoint {
                index,
                timestamp: candles[index].timestamp,
                price: candles[index].high,
            });
        }
    }
    None
}

pub fn find_recent_swing_low(
    candles: &[Candle],
    lookback: usize,
    max_age: usize,
) -> Option<SwingPoint> {
    let len = candles.len();
    if len < 2 * lookback + 1 {
        return None;
    }
    let newest = len - 1 - lookback;
    let oldest = newest.saturating_sub(max_age);
    for index in (oldest..=newest).rev() {
        if is_swing_low(candles, index, lookback) {
            return Some(SwingPoint {
                index,
                timestamp: candles[index].timestamp,
                price: candles[index].low,
            });
        }
    }
    None
}

/// Rolling window extremes for the sniper limit-line overlays:
/// `(rolling max(high), rolling min(low))`, `None` for the warmup slots.
pub fn rolling_extremes(
    candles: &[Candle],
    window: usize,
) -> (Vec<Option<Decimal>>, Vec<Option<Decimal>>) {
    let mut highs = Vec::with_capacity(candles.len());
    let mut lows = Vec::with_capacity(candles.len());
    for i in 0..candles.len() {
        if i + 1 < window {
            highs.push(None);
            lows.push(None);
            continue;
        }
        let slice = &candles[i + 1 - window..=i];
        let high = slice.iter().map(|c| c.high).max();
        let low = slice.iter().map(|c| c.low).min();
        highs.push(high);
        lows.push(low);
    }
    (highs, lows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(i: usize, high: Decimal, low: Decimal) -> Candle {
        let mid = (high + low) / dec!(2);
        Candle::new(
            Utc.timestamp_opt(i as i64 * 900, 0).unwrap(),
            mid,
            high,
            low,
            mid,
            dec!(1),
        )
    }

    fn hill(peak_at: usize, len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let dist = peak_at.abs_diff(i) as i64;
                let high = Decimal::from(110 - dist);
                candle(i, high, high - dec!(2))
            })
            .collect()
    }

    #[test]
    fn detects_strict_swing_high() {
        let candles = hill(5, 11);
        assert!(is_swing_high(&candles, 5, 3));
        assert!(!is_swing_high(&candles, 4, 3));
    }

    #[test]
    fn plateau_is_not_a_swing() {
        // Two equal highs; strict comparison rejects both.
        let mut candles = hill(5, 11);
        candles[6] = candle(6, candles[5].high, candles[5].low);
        assert!(!is_swing_high(&candles, 5, 3));
        assert!(!is_swing_high(&candles, 6, 3));
    }

    #[test]
    fn recent_swing_respects_max_age() {
        let candles = hill(5, 40);
        let found = find_recent_swing_high(&candles, 3, 40).unwrap();
        assert_eq!(found.index, 5);
        // Peak is 34 bars older than the newest candidate; a tight age
        // window must miss it.
        assert!(find_recent_swing_high(&candles, 3, 10).is_none());
    }

    #[test]
    fn rolling_extremes_pad_warmup() {
        let candles = hill(5, 12);
        let (highs, lows) = rolling_extremes(&candles, 4);
        assert!(highs[2].is_none());
        assert_eq!(highs[5], Some(dec!(110)));
        assert!(lows[5].unwrap() < highs[5].unwrap());
    }
}
