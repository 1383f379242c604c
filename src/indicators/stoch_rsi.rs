#![allow(dead_code)]
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

/// Five-band classification of the %K value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StochZone {
    Oversold,
    NeutralLow,
    Neutral,
    NeutralHigh,
    Overbought,
}

#[derive(Debug, Clone, Copy)]
pub struct StochRsiParams {
    pub rsi_period: usize,
    pub stoch_period: usize,
    pub smooth_k: usize,
    pub smooth_d: usize,
    pub oversold: Decimal,
    pub overbought: Decimal,
}

impl Default for StochRsiParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            stoch_period: 14,
            smooth_k: 3,
            smooth_d: 3,
            oversold: dec!(30),
            overbought: dec!(70),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StochRsiResult {
    pub k: Decimal,
    pub d: Decimal,
    pub zone: StochZone,
}

/// Stochastic RSI: RSI series -> stochastic of RSI -> smoothed %K and %D.
pub fn stoch_rsi(candles: &[Candle], params: &StochRsiParams) -> Option<StochRsiResult> {
    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
    let rsi = rsi_series(&closes, params.rsi_period);
    if rsi.len() < params.stoch_period {
        return None;
    }

    // Raw stochastic of the RSI values.
    let mut stoch_raw = Vec::with_capacity(rsi.len() - params.stoch_period + 1);
    for i in (params.stoch_period - 1)..rsi.len() {
        let window = &rsi[i + 1 - params.stoch_period..=i];
        let min = window.iter().copied().fold(window[0], Decimal::min);
        let max = window.iter().copied().fold(window[0], Decimal::max);
        let span = max - min;
        let value = if span.is_zero() {
            dec!(50)
        } else {
            (rsi[i] - min) / span * dec!(100)
        };
        stoch_raw.push(value);
    }

    let k_series = rolling_mean(&stoch_raw, params.smooth_k);
    let d_series = rolling_mean(&k_series, params.smooth_d);

    let k = *k_series.last()?;
    let d = *d_series.last()?;

    let zone = classify_zone(k, params.oversold, params.overbought);
    Some(StochRsiResult { k, d, zone })
}

pub fn stoch_rsi_default(candles: &[Candle]) -> Option<StochRsiResult> {
    stoch_rsi(candles, &StochRsiParams::default())
}

fn classify_zone(k: Decimal, oversold: Decimal, overbought: Decimal) -> StochZone {
    // The neutral band between the configured edges splits at 45/55.
    if k <= oversold {
        StochZone::Oversold
    } else if k >= overbought {
        StochZone::Overbought
    } else if k < dec!(45) {
        StochZone::NeutralLow
    } else if k <= dec!(55) {
        StochZone::Neutral
    } else {
        StochZone::NeutralHigh
    }
}

/// Wilder RSI series over closes; output aligns to `closes[period..]`.
fn rsi_series(closes: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let period_dec = Decimal::from(period as u32);
    let hundred = dec!(100);

    let changes: Vec<Decimal> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain: Decimal = changes[..period]
        .iter()
        .map(|c| c.max(&Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;
    let mut avg_loss: Decimal = changes[..period]
        .iter()
        .map(|c| (-*c).max(Decimal::ZERO))
        .sum::<Decimal>()
        / period_dec;

    let mut series = Vec::with_capacity(changes.len() - period + 1);
    series.push(rsi_value(avg_gain, avg_loss, hundred));

    for change in &changes[period..] {
        let gain = change.max(&Decimal::ZERO);
        let loss = (-*change).max(Decimal::ZERO);
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
        series.push(rsi_value(avg_gain, avg_loss, hundred));
    }
    series
}

fn rsi_value(avg_gain: Decimal, avg_loss: Decimal, hundred: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        if avg_gain.is_zero() {
            dec!(50)
        } else {
            hundred
        }
    } else {
        let rs = avg_gain / avg_loss;
        hundred - hundred / (Decimal::ONE + rs)
    }
}

fn rolling_mean(values: &[Decimal], window: usize) -> Vec<Decimal> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let window_dec = Decimal::from(window as u32);
    values
        .windows(window)
        .map(|w| w.iter().copied().sum::<Decimal>() / window_dec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                Candle::new(
                    Utc.timestamp_opt(i as i64 * 900, 0).unwrap(),
                    *close,
                    *close,
                    *close,
                    *close,
                    dec!(1),
                )
            })
            .collect()
    }

    #[test]
    fn short_window_is_none() {
        let closes: Vec<Decimal> = (0..20).map(Decimal::from).collect();
        let candles = candles_from_closes(&closes);
        assert!(stoch_rsi_default(&candles).is_none());
    }

    #[test]
    fn rally_after_dip_is_overbought() {
        // Decline drags RSI down, then a sustained rally pushes the current
        // RSI to the top of its trailing window.
        let mut closes: Vec<Decimal> = (0..30).map(|i| Decimal::from(200 - i)).collect();
        closes.extend((0..30).map(|i| Decimal::from(171 + i)));
        let candles = candles_from_closes(&closes);
        let result = stoch_rsi_default(&candles).unwrap();
        assert_eq!(result.zone, StochZone::Overbought);
        assert!(result.k >= dec!(70));
    }

    #[test]
    fn selloff_after_rally_is_oversold() {
        let mut closes: Vec<Decimal> = (0..30).map(|i| Decimal::from(100 + i)).collect();
        closes.extend((0..30).map(|i| Decimal::from(129 - i)));
        let candles = candles_from_closes(&closes);
        let result = stoch_rsi_default(&candles).unwrap();
        assert_eq!(result.zone, StochZone::Oversold);
    }

    #[test]
    fn zone_edges() {
        let params = StochRsiParams::default();
        assert_eq!(
            classify_zone(dec!(30), params.oversold, params.overbought),
            StochZone::Oversold
        );
        assert_eq!(
            classify_zone(dec!(40), params.oversold, params.overbought),
            StochZone::NeutralLow
        );
        assert_eq!(
            classify_zone(dec!(50), params.oversold, params.overbought),
            StochZone::Neutral
        );
        assert_eq!(
            classify_zone(dec!(60), params.oversold, params.overbought),
            StochZone::NeutralHigh
        );
        assert_eq!(
            classify_zone(dec!(70), params.oversold, params.overbought),
            StochZone::Overbought
        );
    }
}
