use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing::debug;

use crate::indicators::{detect_regime, sma, RegimeParams, RegimeType, StochZone};
use crate::types::{Side, TpLevels, TradingSignal, TrendBias};

use super::confluence::{ConfluenceConditions, ConfluenceWeights};
use super::{MarketContext, StrategyConfig};

/// Trend Pullback: trades continuation entries in the direction of the HTF
/// bias after a pullback into value, gated by the market regime and scored
/// by weighted confluence. Unlike the liquidity sniper this strategy obeys
/// the bias filter; it never fights the higher timeframe.
#[derive(Debug, Clone)]
pub struct PullbackSignalGenerator {
    pub min_history: usize,
    pub weights: ConfluenceWeights,
    pub regime_params: RegimeParams,
    /// Volume must exceed this multiple of its trailing average to count
    /// as confirmation.
    pub volume_spike_ratio: Decimal,
    pub volume_ma_period: usize,
    /// TP ladder expressed in R multiples of the initial risk.
    pub rr_targets: [Decimal; 3],
}

impl Default for PullbackSignalGenerator {
    fn default() -> Self {
        Self {
            min_history: 50,
            weights: ConfluenceWeights::default(),
            regime_params: RegimeParams::default(),
            volume_spike_ratio: dec!(1.5),
            volume_ma_period: 20,
            rr_targets: [dec!(2), dec!(3), dec!(4)],
        }
    }
}

impl PullbackSignalGenerator {
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

        // Continuation trades only exist in the direction of the bias.
        let side = match ctx.htf_bias {
            TrendBias::Bullish => Side::Buy,
            TrendBias::Bearish => Side::Sell,
            TrendBias::Neutral => return None,
        };

        // Regime gate: a ranging market is a no-trade condition.
        let regime = detect_regime(ctx.candles, &self.regime_params)?;
        if !regime.should_trade {
            debug!("[{}] pullback skipped: {} regime", symbol, regime.regime.as_str());
            return None;
        }

        let conditions = self.evaluate_conditions(ctx, side);
        let confluence = self.weights.score(&conditions);
        if !confluence.is_valid {
            debug!(
                "[{}] pullback confluence {:.2} below {:.2}",
                symbol, confluence.score, self.weights.min_score
            );
            return None;
        }

        let entry = ctx.price;
        let stop_loss = match side {
            Side::Buy => entry * (Decimal::ONE - config.stop_loss_buffer),
            Side::Sell => entry * (Decimal::ONE + config.stop_loss_buffer),
        };
        let risk = (entry - stop_loss).abs();
        if risk.is_zero() {
            return None;
        }

        let target = |multiple: Decimal| match side {
            Side::Buy => entry + risk * multiple,
            Side::Sell => entry - risk * multiple,
        };
        let tp_levels = TpLevels {
            tp1: target(self.rr_targets[0]),
            tp2: target(self.rr_targets[1]),
            tp3: target(self.rr_targets[2]),
        };

        // Confidence is the confluence score, nudged up when the regime is
        // the calm-trend state this setup is built for.
        let mut confidence = confluence.score;
        if regime.regime == RegimeType::TrendingLowVol {
            confidence = (confidence + dec!(0.05)).min(dec!(0.95));
        }

        let mut reasons = vec![format!(
            "Pullback continuation ({} regime)",
            regime.regime.as_str()
        )];
        reasons.extend(confluence.reasons);

        let mut indicators = BTreeMap::new();
        indicators.insert("atr".to_string(), ctx.atr);
        indicators.insert("adx".to_string(), regime.adx);
        indicators.insert("confluence".to_string(), confluence.score);
        if let Some(vwap) = &ctx.vwap {
            indicators.insert("vwap".to_string(), vwap.vwap);
        }

        debug!(
            "[{}] pullback {}: entry {:.4} stop {:.4} tp1 {:.4} confidence {:.2}",
            symbol, side, entry, stop_loss, tp_levels.tp1, confidence
        );

        Some(TradingSignal {
            symbol: symbol.to_string(),
            side,
            generated_at: ctx.current.timestamp,
            reference_price: entry,
            entry_price: entry,
            is_limit_order: false,
            stop_loss,
            tp_levels,
            risk_reward_ratio: self.rr_targets[0],
            confidence,
            reasons,
            indicators,
        })
    }

    fn evaluate_conditions(&self, ctx: &MarketContext<'_>, side: Side) -> ConfluenceConditions {
        let price = ctx.price;

        let trend_alignment = ctx
            .vwap
            .as_ref()
            .map(|v| match side {
                Side::Buy => price > v.vwap,
                Side::Sell => price < v.vwap,
            })
            .unwrap_or(false);

        // Pulled back into the value zone: lower part of the bands for a
        // long, upper part for a short.
        let pullback_zone = ctx
            .bollinger
            .as_ref()
            .and_then(|b| b.percent_b)
            .map(|pct_b| match side {
                Side::Buy => pct_b <= dec!(0.4),
                Side::Sell => pct_b >= dec!(0.6),
            })
            .unwrap_or(false);

        let momentum_trigger = ctx
            .stoch_rsi
            .as_ref()
            .map(|s| match side {
                Side::Buy => {
                    matches!(s.zone, StochZone::Oversold | StochZone::NeutralLow) && s.k > s.d
                }
                Side::Sell => {
                    matches!(s.zone, StochZone::Overbought | StochZone::NeutralHigh) && s.k < s.d
                }
            })
            .unwrap_or(false);

        let candle_confirmation = match side {
            Side::Buy => ctx.current.is_bullish(),
            Side::Sell => ctx.current.is_bearish(),
        };

        let volumes: Vec<Decimal> = ctx.candles.iter().map(|c| c.volume).collect();
        let volume_confirmation = sma(&volumes, self.volume_ma_period)
            .map(|avg| !avg.is_zero() && ctx.current.volume > avg * self.volume_spike_ratio)
            .unwrap_or(false);

        ConfluenceConditions {
            trend_alignment,
            pullback_zone,
            momentum_trigger,
            candle_confirmation,
            volume_confirmation,
        }
    }
}
