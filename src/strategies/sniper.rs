use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{Side, TpLevels, TradingSignal};

use super::{MarketContext, StrategyConfig};

/// Liquidity Sniper: parks limit orders just beyond recent swing extremes to
/// front-run liquidity sweeps. A mean-reversion play, so the HTF bias filter
/// is deliberately not consulted here.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    /// Bars of history required before any signal is considered.
    pub min_history: usize,
    /// Window (excluding the current bar) scanned for the swing extremes.
    pub swing_window: usize,
    /// TP ladder fan-out step: tp2 = tp1*(1 +/- k), tp3 = tp1*(1 +/- 2k).
    pub tp_step: Decimal,
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self {
            min_history: 50,
            swing_window: 20,
            tp_step: dec!(0.05),
        }
    }
}

impl SignalGenerator {
    /// At most one signal per symbol per tick; `None` when price sits
    /// outside the proximity band of both swing extremes.
    pub fn generate(
        &self,
        ctx: &MarketContext<'_>,
        config: &StrategyConfig,
        symbol: &str,
    ) -> Option<TradingSignal> {
        if ctx.candles.len() < self.min_history {
            return None;
        }
        if ctx.atr <= Decimal::ZERO {
            return None;
        }

        // Swing extremes over the last `swing_window` bars, current excluded.
        let len = ctx.candles.len();
        let window = &ctx.candles[len - 1 - self.swing_window..len - 1];
        let swing_low = window.iter().map(|c| c.low).min()?;
        let swing_high = window.iter().map(|c| c.high).max()?;
        if swing_low.is_zero() || swing_high.is_zero() {
            return None;
        }

        let price = ctx.price;
        let dist_to_low = (price - swing_low) / swing_low;
        let dist_to_high = (swing_high - price) / swing_high;

        // Volatile symbols overshoot their sweeps; the dynamic variant
        // widens the proximity band with ATR, up to double the base.
        let mut threshold = config.vwap_distance_threshold;
        if config.use_dynamic_threshold && !price.is_zero() {
            let atr_pct = ctx.atr / price;
            let scale = (atr_pct / dec!(0.01)).clamp(Decimal::ONE, Decimal::TWO);
            threshold *= scale;
        }

        let (side, limit_price, stop_loss, tp1) =
            if dist_to_low > Decimal::ZERO && dist_to_low < threshold {
                let limit = swing_low * dec!(0.999);
                (Side::Buy, limit, limit * dec!(0.995), limit * dec!(1.02))
            } else if dist_to_high > Decimal::ZERO && dist_to_high < threshold {
                let limit = swing_high * dec!(1.001);
                (Side::Sell, limit, limit * dec!(1.005), limit * dec!(0.98))
            } else {
                return None;
            };

        // Confidence: base score plus a bonus for price stretched away from
        // VWAP (the further the stretch, the better the reversion odds).
        let mut confidence = dec!(0.70);
        if let Some(vwap) = &ctx.vwap {
            if !vwap.vwap.is_zero() {
                let stretch = (price - vwap.vwap).abs() / vwap.vwap;
                confidence += (stretch * dec!(10)).min(dec!(0.20));
            }
        }

        let tp_levels = match side {
            Side::Buy => TpLevels {
                tp1,
                tp2: tp1 * (Decimal::ONE + self.tp_step),
                tp3: tp1 * (Decimal::ONE + self.tp_step * Decimal::TWO),
            },
            Side::Sell => TpLevels {
                tp1,
                tp2: tp1 * (Decimal::ONE - self.tp_step),
                tp3: tp1 * (Decimal::ONE - self.tp_step * Decimal::TWO),
            },
        };

        let risk = (limit_price - stop_loss).abs();
        if risk.is_zero() {
            return None;
        }
        let risk_reward_ratio = (tp1 - limit_price).abs() / risk;

        let mut indicators = BTreeMap::new();
        indicators.insert("atr".to_string(), ctx.atr);
        if let Some(vwap) = &ctx.vwap {
            indicators.insert("vwap".to_string(), vwap.vwap);
        }
        if let Some(sfp) = &ctx.sfp {
            indicators.insert("sfp_confidence".to_string(), sfp.confidence);
        }

        let mut reasons = vec![format!("Sniper limit @ {:.4}", limit_price)];
        if let Some(sfp) = &ctx.sfp {
            reasons.push(format!(
                "SFP sweep of {:.4} (confidence {:.2})",
                sfp.swing_price, sfp.confidence
            ));
        }

        debug!(
            "[{}] sniper {}: limit {:.4} stop {:.4} tp1 {:.4} confidence {:.2}",
            symbol, side, limit_price, stop_loss, tp1, confidence
        );

        Some(TradingSignal {
            symbol: symbol.to_string(),
            side,
            generated_at: ctx.current.timestamp,
            reference_price: price,
            entry_price: limit_price,
            is_limit_order: true,
            stop_loss,
            tp_levels,
            risk_reward_ratio,
            confidence,
            reasons,
            indicators,
        })
    }
}
