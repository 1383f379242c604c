use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{BacktestError, Result};

/// The five confluence conditions the pullback strategy weighs, with the
/// pullback zone carrying the most weight and the cosmetic confirmations
/// the least.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfluenceConditions {
    /// Price on the trend side of VWAP.
    pub trend_alignment: bool,
    /// Price pulled back into the value zone.
    pub pullback_zone: bool,
    /// StochRSI turning out of the stretched zone.
    pub momentum_trigger: bool,
    /// Candle closed in the trade direction.
    pub candle_confirmation: bool,
    /// Volume above its trailing average.
    pub volume_confirmation: bool,
}

/// Weighted confluence scoring: instead of requiring N of M binary
/// conditions, each condition contributes its weight and the total must
/// clear `min_score`.
#[derive(Debug, Clone)]
pub struct ConfluenceWeights {
    pub trend_alignment: Decimal,
    pub pullback_zone: Decimal,
    pub momentum_trigger: Decimal,
    pub candle_confirmation: Decimal,
    pub volume_confirmation: Decimal,
    pub min_score: Decimal,
}

impl Default for ConfluenceWeights {
    fn default() -> Self {
        Self {
            trend_alignment: dec!(0.25),
            pullback_zone: dec!(0.30),
            momentum_trigger: dec!(0.25),
            candle_confirmation: dec!(0.10),
            volume_confirmation: dec!(0.10),
            min_score: dec!(0.60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfluenceScore {
    /// Weighted total in [0, 1].
    pub score: Decimal,
    pub is_valid: bool,
    pub reasons: Vec<String>,
}

impl ConfluenceWeights {
    pub fn validate(&self) -> Result<()> {
        let total = self.trend_alignment
            + self.pullback_zone
            + self.momentum_trigger
            + self.candle_confirmation
            + self.volume_confirmation;
        if (total - Decimal::ONE).abs() > dec!(0.01) {
            return Err(BacktestError::Config(format!(
                "confluence weights sum to {}, expected 1.0",
                total
            )));
        }
        if self.min_score <= Decimal::ZERO || self.min_score > Decimal::ONE {
            return Err(BacktestError::Config(
                "confluence min_score must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn score(&self, conditions: &ConfluenceConditions) -> ConfluenceScore {
        let weighted = [
            ("trend_alignment", conditions.trend_alignment, self.trend_alignment),
            ("pullback_zone", conditions.pullback_zone, self.pullback_zone),
            ("momentum_trigger", conditions.momentum_trigger, self.momentum_trigger),
            (
                "candle_confirmation",
                conditions.candle_confirmation,
                self.candle_confirmation,
            ),
            (
                "volume_confirmation",
                conditions.volume_confirmation,
                self.volume_confirmation,
            ),
        ];

        let mut score = Decimal::ZERO;
        let mut reasons = Vec::with_capacity(weighted.len());
        for (name, met, weight) in weighted {
            if met {
                score += weight;
                reasons.push(format!("+ {} ({})", name, weight));
            } else {
                reasons.push(format!("- {}", name));
            }
        }

        ConfluenceScore {
            score,
            is_valid: score >= self.min_score,
            reasons,
        }
    }
}
