use rust_decimal::Decimal;

use crate::types::Candle;

pub const DEFAULT_ATR_PERIOD: usize = 14;

/// True range of `candle` against the previous close.
pub fn true_range(candle: &Candle, prev_close: Decimal) -> Decimal {
    let hl = candle.high - candle.low;
    let hc = (candle.high - prev_close).abs();
    let lc = (candle.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Average True Range with Wilder's smoothing.
///
/// The first ATR is the simple average of the first `period` true ranges;
/// each subsequent value is `((prev * (period - 1)) + tr) / period`.
/// Returns zero when fewer than `period + 1` candles are available.
pub fn atr(candles: &[Candle], period: usize) -> Decimal {
    if period == 0 || candles.len() < period + 1 {
        return Decimal::ZERO;
    }

    let period_dec = Decimal::from(period as u32);
    let mut true_ranges = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close));

    let mut value: Decimal = true_ranges.by_ref().take(period).sum::<Decimal>() / period_dec;
    for tr in true_ranges {
        value = (value * (period_dec - Decimal::ONE) + tr) / period_dec;
    }
    value
}
