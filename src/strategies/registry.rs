use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BacktestError, Result};
use crate::types::TimeFrame;

use super::StrategyKind;

/// Per-symbol parameter bundle. Pure data; no behavior attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy: StrategyKind,
    /// Proximity band around the swing level, as a fraction of price.
    pub vwap_distance_threshold: Decimal,
    pub sfp_confidence_threshold: Decimal,
    pub stop_loss_buffer: Decimal,
    pub tp_targets: Vec<Decimal>,
    pub timeframe: TimeFrame,
    pub use_dynamic_threshold: bool,
}

impl StrategyConfig {
    fn validate(&self, symbol: &str) -> Result<()> {
        if self.vwap_distance_threshold <= Decimal::ZERO {
            return Err(BacktestError::Config(format!(
                "{}: vwap_distance_threshold must be positive",
                symbol
            )));
        }
        if self.sfp_confidence_threshold <= Decimal::ZERO
            || self.sfp_confidence_threshold > Decimal::ONE
        {
            return Err(BacktestError::Config(format!(
                "{}: sfp_confidence_threshold must be in (0, 1]",
                symbol
            )));
        }
        if self.stop_loss_buffer <= Decimal::ZERO {
            return Err(BacktestError::Config(format!(
                "{}: stop_loss_buffer must be positive",
                symbol
            )));
        }
        if self.tp_targets.is_empty() {
            return Err(BacktestError::Config(format!(
                "{}: tp_targets must not be empty",
                symbol
            )));
        }
        if self.tp_targets.iter().any(|t| *t <= Decimal::ZERO) {
            return Err(BacktestError::Config(format!(
                "{}: tp_targets must be positive",
                symbol
            )));
        }
        Ok(())
    }
}

/// Symbol-keyed strategy parameter table. Lookups for unlisted symbols fall
/// back to the default ("engine") profile.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    table: HashMap<String, StrategyConfig>,
    default: StrategyConfig,
}

impl StrategyRegistry {
    pub fn new(table: HashMap<String, StrategyConfig>, default: StrategyConfig) -> Result<Self> {
        default.validate("default")?;
        for (symbol, config) in &table {
            config.validate(symbol)?;
        }
        Ok(Self { table, default })
    }

    /// The tuned built-in table.
    pub fn builtin() -> Self {
        let bnb = StrategyConfig {
            strategy: StrategyKind::LiquiditySniper,
            vwap_distance_threshold: dec!(0.015),
            sfp_confidence_threshold: dec!(0.7),
            stop_loss_buffer: dec!(0.02),
            tp_targets: vec![dec!(1.0)],
            timeframe: TimeFrame::M15,
            use_dynamic_threshold: false,
        };
        let sol = StrategyConfig {
            strategy: StrategyKind::LiquiditySniper,
            vwap_distance_threshold: dec!(0.02),
            sfp_confidence_threshold: dec!(0.75),
            stop_loss_buffer: dec!(0.03),
            tp_targets: vec![dec!(1.0)],
            timeframe: TimeFrame::M15,
            use_dynamic_threshold: true,
        };
        let tao = StrategyConfig {
            strategy: StrategyKind::LiquiditySniper,
            vwap_distance_threshold: dec!(0.025),
            sfp_confidence_threshold: dec!(0.75),
            stop_loss_buffer: dec!(0.04),
            tp_targets: vec![dec!(1.0)],
            timeframe: TimeFrame::M15,
            use_dynamic_threshold: true,
        };
        let btc = StrategyConfig {
            strategy: StrategyKind::LiquiditySniper,
            vwap_distance_threshold: dec!(0.01),
            sfp_confidence_threshold: dec!(0.75),
            stop_loss_buffer: dec!(0.015),
            tp_targets: vec![dec!(1.0)],
            timeframe: TimeFrame::M15,
            use_dynamic_threshold: false,
        };

        let mut table = HashMap::new();
        table.insert("BNBUSDT".to_string(), bnb.clone());
        table.insert("SOLUSDT".to_string(), sol);
        table.insert("TAOUSDT".to_string(), tao);
        table.insert("BTCUSDT".to_string(), btc);

        Self::new(table, bnb).expect("built-in registry values are valid")
    }

    pub fn config_for(&self, symbol: &str) -> &StrategyConfig {
        self.table
            .get(&symbol.to_uppercase())
            .unwrap_or(&self.default)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
