use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

pub const DEFAULT_ADX_PERIOD: usize = 14;

/// Average Directional Index with EMA smoothing.
///
/// Directional movement is taken against the previous bar; +DM/-DM, true
/// range and DX are each smoothed with `alpha = 2 / (period + 1)`. Returns
/// `None` when fewer than `2 * period` candles are available, since the
/// double smoothing has not settled before that.
pub fn adx(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let alpha = Decimal::from(2) / Decimal::from(period as u32 + 1);
    let one_minus = Decimal::ONE - alpha;
    let hundred = dec!(100);

    let mut smoothed_tr: Option<Decimal> = None;
    let mut smoothed_plus: Option<Decimal> = None;
    let mut smoothed_minus: Option<Decimal> = None;
    let mut smoothed_dx: Option<Decimal> = None;

    let mut ema_step = |current: &mut Option<Decimal>, value: Decimal| -> Decimal {
        let next = match *current {
            Some(prev) => value * alpha + prev * one_minus,
            None => value,
        };
        *current = Some(next);
        next
    };

    for window in candles.windows(2) {
        let prev = &window[0];
        let current = &window[1];

        let tr = (current.high - current.low)
            .max((current.high - prev.close).abs())
            .max((current.low - prev.close).abs());

        let up_move = current.high - prev.high;
        let down_move = prev.low - current.low;
        let plus_dm = if up_move > down_move && up_move > Decimal::ZERO {
            up_move
        } else {
            Decimal::ZERO
        };
        let minus_dm = if down_move > up_move && down_move > Decimal::ZERO {
            down_move
        } else {
            Decimal::ZERO
        };

        let atr = ema_step(&mut smoothed_tr, tr);
        let plus_avg = ema_step(&mut smoothed_plus, plus_dm);
        let minus_avg = ema_step(&mut smoothed_minus, minus_dm);

        let (plus_di, minus_di) = if atr.is_zero() {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            (hundred * plus_avg / atr, hundred * minus_avg / atr)
        };

        let di_sum = plus_di + minus_di;
        let dx = if di_sum.is_zero() {
            Decimal::ZERO
        } else {
            hundred * (plus_di - minus_di).abs() / di_sum
        };
        ema_step(&mut smoothed_dx, dx);
    }

    smoothed_dx
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(i: i64, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle::new(
            Utc.timestamp_opt(i * 900, 0).unwrap(),
            close,
            high,
            low,
            close,
            dec!(100),
        )
    }

    #[test]
    fn short_window_is_none() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| candle(i, dec!(101), dec!(99), dec!(100)))
            .collect();
        assert!(adx(&candles, 14).is_none());
    }

    #[test]
    fn steady_trend_reads_strongly_directional() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = dec!(100) + Decimal::from(i) * dec!(0.5);
                candle(i, base + dec!(0.5), base - dec!(0.5), base)
            })
            .collect();
        let value = adx(&candles, 14).unwrap();
        assert!(value > dec!(25), "adx {} should exceed 25", value);
    }

    #[test]
    fn alternating_chop_reads_directionless() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let offset = if i % 2 == 0 { dec!(1) } else { dec!(-1) };
                let base = dec!(100) + offset;
                candle(i, base + dec!(0.5), base - dec!(0.5), base)
            })
            .collect();
        let value = adx(&candles, 14).unwrap();
        assert!(value < dec!(25), "adx {} should stay below 25", value);
    }
}
