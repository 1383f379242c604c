#![allow(dead_code)]
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

use super::adx::{adx, DEFAULT_ADX_PERIOD};
use super::sma;

/// Market regime classification.
///
/// Trend-following entries want a trending market, ideally a calm one;
/// a ranging market is a no-trade signal for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegimeType {
    TrendingLowVol,
    TrendingHighVol,
    Ranging,
}

impl RegimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeType::TrendingLowVol => "TRENDING_LOW_VOL",
            RegimeType::TrendingHighVol => "TRENDING_HIGH_VOL",
            RegimeType::Ranging => "RANGING",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeResult {
    pub regime: RegimeType,
    pub confidence: Decimal,
    pub adx: Decimal,
    /// Annualized realized volatility of log returns.
    pub realized_vol: f64,
    pub volume_ratio: Decimal,
    pub should_trade: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeParams {
    pub feature_window: usize,
    pub adx_period: usize,
    /// ADX at or above this reads as trending.
    pub adx_trending_threshold: Decimal,
    /// Return periods per year for volatility annualization
    /// (15-minute bars: 252 trading days x 24 x 4).
    pub periods_per_year: f64,
    pub min_candles: usize,
}

impl Default for RegimeParams {
    fn default() -> Self {
        Self {
            feature_window: 20,
            adx_period: DEFAULT_ADX_PERIOD,
            adx_trending_threshold: dec!(25),
            periods_per_year: 252.0 * 24.0 * 4.0,
            min_candles: 50,
        }
    }
}

/// Rule-based regime classification over ADX and realized volatility.
///
/// Trending when ADX clears the threshold; the low/high volatility split
/// compares the latest rolling volatility against the median of the
/// volatility series over the supplied window, keeping the function pure.
pub fn detect_regime(candles: &[Candle], params: &RegimeParams) -> Option<RegimeResult> {
    if candles.len() < params.min_candles.max(2 * params.adx_period) {
        return None;
    }

    let adx_value = adx(candles, params.adx_period)?;

    let vol_series = rolling_realized_vol(candles, params.feature_window, params.periods_per_year);
    let latest_vol = *vol_series.last()?;
    let median_vol = median(&vol_series)?;

    let volumes: Vec<Decimal> = candles.iter().map(|c| c.volume).collect();
    let volume_ratio = match sma(&volumes, params.feature_window) {
        Some(avg) if !avg.is_zero() => {
            let ratio = candles[candles.len() - 1].volume / avg;
            ratio.clamp(dec!(0.5), dec!(3))
        }
        _ => Decimal::ONE,
    };

    let (regime, confidence) = if adx_value >= params.adx_trending_threshold {
        if latest_vol < median_vol {
            (RegimeType::TrendingLowVol, dec!(0.8))
        } else {
            (RegimeType::TrendingHighVol, dec!(0.7))
        }
    } else {
        (RegimeType::Ranging, dec!(0.75))
    };

    Some(RegimeResult {
        regime,
        confidence,
        adx: adx_value,
        realized_vol: latest_vol,
        volume_ratio,
        should_trade: regime != RegimeType::Ranging,
    })
}

/// Rolling standard deviation of log returns, annualized. Statistical
/// aggregate, so it runs in f64.
fn rolling_realized_vol(candles: &[Candle], window: usize, periods_per_year: f64) -> Vec<f64> {
    let closes: Vec<f64> = candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect();
    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect();
    if returns.len() < window {
        return Vec::new();
    }

    let annualize = periods_per_year.sqrt();
    returns
        .windows(window)
        .map(|w| {
            let n = w.len() as f64;
            let mean = w.iter().sum::<f64>() / n;
            let variance = w.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
            variance.sqrt() * annualize
        })
        .collect()
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(sorted[sorted.len() / 2])
}
