#![allow(dead_code)]
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::Candle;

use super::swing::{find_recent_swing_high, find_recent_swing_low, DEFAULT_SWING_LOOKBACK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SfpType {
    Bullish,
    Bearish,
}

/// A detected Swing Failure Pattern: the latest closed candle swept beyond
/// a recent swing level and closed back inside its range.
#[derive(Debug, Clone, Copy)]
pub struct SfpResult {
    pub sfp_type: SfpType,
    pub swing_price: Decimal,
    /// Sweep depth beyond the swing, in percent of the swing price.
    pub penetration_pct: Decimal,
    /// Rejected-wick fraction of the candle range, in [0, 1].
    pub rejection_strength: Decimal,
    /// Candle volume over the trailing average.
    pub volume_ratio: Decimal,
    pub confidence: Decimal,
}

#[derive(Debug, Clone, Copy)]
pub struct SfpParams {
    /// Max age (in bars) of the swing level being swept.
    pub swing_lookback: usize,
    /// Pivot strength of the underlying swing detection.
    pub pivot_lookback: usize,
    pub volume_ma_period: usize,
}

impl Default for SfpParams {
    fn default() -> Self {
        Self {
            swing_lookback: 20,
            pivot_lookback: DEFAULT_SWING_LOOKBACK,
            volume_ma_period: 20,
        }
    }
}

/// Detect an SFP on the latest closed candle.
///
/// Bullish: `low < swing_low.price` and `close > swing_low.price`;
/// bearish symmetric against the recent swing high.
pub fn detect_sfp(candles: &[Candle], params: &SfpParams) -> Option<SfpResult> {
    if candles.len() < params.swing_lookback.max(params.volume_ma_period) + 5 {
        return None;
    }

    let current = candles.last()?;
    let prior = &candles[..candles.len() - 1];

    if let Some(swing_low) = find_recent_swing_low(prior, params.pivot_lookback, params.swing_lookback)
    {
        if current.low < swing_low.price && current.close > swing_low.price {
            return Some(score_sfp(
                SfpType::Bullish,
                current,
                swing_low.price,
                candles,
                params.volume_ma_period,
            ));
        }
    }

    if let Some(swing_high) =
        find_recent_swing_high(prior, params.pivot_lookback, params.swing_lookback)
    {
        if current.high > swing_high.price && current.close < swing_high.price {
            return Some(score_sfp(
                SfpType::Bearish,
                current,
                swing_high.price,
                candles,
                params.volume_ma_period,
            ));
        }
    }

    None
}

fn score_sfp(
    sfp_type: SfpType,
    current: &Candle,
    swing_price: Decimal,
    candles: &[Candle],
    volume_ma_period: usize,
) -> SfpResult {
    let penetration_pct = match sfp_type {
        SfpType::Bullish => (swing_price - current.low) / swing_price * dec!(100),
        SfpType::Bearish => (current.high - swing_price) / swing_price * dec!(100),
    };

    let range = current.range();
    let rejected_wick = match sfp_type {
        SfpType::Bullish => current.close - current.low,
        SfpType::Bearish => current.high - current.close,
    };
    let rejection_strength = if range.is_zero() {
        Decimal::ZERO
    } else {
        rejected_wick / range
    };

    let trailing = &candles[candles.len() - 1 - volume_ma_period..candles.len() - 1];
    let avg_volume: Decimal =
        trailing.iter().map(|c| c.volume).sum::<Decimal>() / Decimal::from(volume_ma_period as u32);
    let volume_ratio = if avg_volume.is_zero() {
        Decimal::ONE
    } else {
        current.volume / avg_volume
    };

    // Confidence = rejection strength, boosted by unusual volume and by a
    // sweep that is deep enough to matter but shallow enough to still be a
    // sweep rather than a breakdown.
    let mut confidence = rejection_strength;
    if volume_ratio > dec!(1.5) {
        confidence = (confidence * dec!(1.2)).min(Decimal::ONE);
    }
    if penetration_pct > dec!(0.1) && penetration_pct < dec!(1.5) {
        confidence = (confidence * dec!(1.1)).min(Decimal::ONE);
    }

    SfpResult {
        sfp_type,
        swing_price,
        penetration_pct,
        rejection_strength,
        volume_ratio,
        confidence,
    }
}
