use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{BacktestError, Result};
use crate::indicators::ema;
use crate::types::{Candle, Side, TrendBias};

/// Higher-timeframe trend filter: EMA-200 of closes with a whipsaw buffer.
///
/// Trend-following strategies must trade with the bias; the liquidity
/// sniper ignores it by design.
#[derive(Debug, Clone)]
pub struct TrendFilter {
    pub ema_period: usize,
    pub buffer_pct: Decimal,
}

impl TrendFilter {
    pub fn new(ema_period: usize, buffer_pct: Decimal) -> Result<Self> {
        if ema_period < 1 {
            return Err(BacktestError::Config(
                "EMA period must be at least 1".to_string(),
            ));
        }
        if buffer_pct < Decimal::ZERO || buffer_pct >= dec!(0.10) {
            return Err(BacktestError::Config(
                "buffer percentage must be within [0, 0.10)".to_string(),
            ));
        }
        Ok(Self {
            ema_period,
            buffer_pct,
        })
    }

    /// Classify the higher-timeframe series. `NEUTRAL` when fewer than
    /// `ema_period` samples exist.
    pub fn get_trend_direction(&self, candles: &[Candle]) -> TrendBias {
        if candles.len() < self.ema_period {
            return TrendBias::Neutral;
        }
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let Some(ema_value) = ema(&closes, self.ema_period) else {
            return TrendBias::Neutral;
        };

        let price = closes[closes.len() - 1];
        let buffer = ema_value * self.buffer_pct;

        if price > ema_value + buffer {
            TrendBias::Bullish
        } else if price < ema_value - buffer {
            TrendBias::Bearish
        } else {
            TrendBias::Neutral
        }
    }

    /// Trend-following gate: BUY needs a bullish bias, SELL a bearish one.
    pub fn is_trade_allowed(&self, side: Side, bias: TrendBias) -> bool {
        match (side, bias) {
            (Side::Buy, TrendBias::Bullish) => true,
            (Side::Sell, TrendBias::Bearish) => true,
            _ => false,
        }
    }
}

impl Default for TrendFilter {
    fn default() -> Self {
        Self {
            ema_period: 200,
            buffer_pct: dec!(0.005),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles(closes: impl IntoIterator<Item = Decimal>) -> Vec<Candle> {
        closes
            .into_iter()
            .enumerate()
            .map(|(i, close)| {
                Candle::new(
                    Utc.timestamp_opt(i as i64 * 14400, 0).unwrap(),
                    close,
                    close,
                    close,
                    close,
                    dec!(1),
                )
            })
            .collect()
    }

    #[test]
    fn short_series_is_neutral() {
        let filter = TrendFilter::default();
        let series = candles((0..199).map(|_| dec!(100)));
        assert_eq!(filter.get_trend_direction(&series), TrendBias::Neutral);
    }

    #[test]
    fn close_above_buffered_ema_is_bullish() {
        let filter = TrendFilter::default();
        let mut closes: Vec<Decimal> = (0..240).map(|_| dec!(100)).collect();
        let last = closes.len() - 1;
        closes[last] = dec!(120);
        assert_eq!(filter.get_trend_direction(&candles(closes)), TrendBias::Bullish);
    }

    #[test]
    fn close_below_buffered_ema_is_bearish() {
        let filter = TrendFilter::default();
        let mut closes: Vec<Decimal> = (0..240).map(|_| dec!(100)).collect();
        let last = closes.len() - 1;
        closes[last] = dec!(80);
        assert_eq!(filter.get_trend_direction(&candles(closes)), TrendBias::Bearish);
    }

    #[test]
    fn close_inside_buffer_is_neutral() {
        let filter = TrendFilter::default();
        let closes: Vec<Decimal> = (0..240).map(|_| dec!(100)).collect();
        assert_eq!(filter.get_trend_direction(&candles(closes)), TrendBias::Neutral);
    }

    #[test]
    fn gate_requires_aligned_bias() {
        let filter = TrendFilter::default();
        assert!(filter.is_trade_allowed(Side::Buy, TrendBias::Bullish));
        assert!(filter.is_trade_allowed(Side::Sell, TrendBias::Bearish));
        assert!(!filter.is_trade_allowed(Side::Buy, TrendBias::Bearish));
        assert!(!filter.is_trade_allowed(Side::Buy, TrendBias::Neutral));
        assert!(!filter.is_trade_allowed(Side::Sell, TrendBias::Bullish));
    }

    #[test]
    fn invalid_params_rejected() {
        assert!(TrendFilter::new(0, dec!(0.005)).is_err());
        assert!(TrendFilter::new(200, dec!(0.2)).is_err());
        assert!(TrendFilter::new(200, dec!(-0.01)).is_err());
    }
}
