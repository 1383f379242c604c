use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BacktestError, Result};
use crate::types::TimeFrame;

/// Engine entry-point parameters. Read once at engine construction and
/// threaded through as immutable state; validated before any fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub symbols: Vec<String>,
    pub interval: TimeFrame,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default = "default_warmup")]
    pub warmup_candles: usize,
    #[serde(default = "default_htf_interval")]
    pub htf_interval: TimeFrame,

    pub initial_balance: Decimal,
    pub risk_per_trade: Decimal,
    pub leverage: Decimal,
    pub max_positions: usize,
    #[serde(default)]
    pub max_order_value: Decimal,
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: Decimal,
    #[serde(default)]
    pub fee_rate: Decimal,

    #[serde(default = "default_true")]
    pub enable_circuit_breaker: bool,
    #[serde(default = "default_cb_losses")]
    pub cb_max_consecutive_losses: u32,
    #[serde(default = "default_cb_cooldown_hours")]
    pub cb_cooldown_hours: i64,
    #[serde(default = "default_cb_drawdown_limit")]
    pub cb_drawdown_limit: Decimal,
}

fn default_warmup() -> usize {
    50
}

fn default_htf_interval() -> TimeFrame {
    TimeFrame::H4
}

fn default_maintenance_margin_rate() -> Decimal {
    dec!(0.004)
}

fn default_true() -> bool {
    true
}

fn default_cb_losses() -> u32 {
    3
}

fn default_cb_cooldown_hours() -> i64 {
    4
}

fn default_cb_drawdown_limit() -> Decimal {
    dec!(0.10)
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            symbols: vec!["BNBUSDT".to_string()],
            interval: TimeFrame::M15,
            start: Utc::now() - chrono::Duration::days(30),
            end: None,
            warmup_candles: default_warmup(),
            htf_interval: default_htf_interval(),
            initial_balance: dec!(10000),
            risk_per_trade: dec!(0.01),
            leverage: Decimal::ONE,
            max_positions: 3,
            max_order_value: Decimal::ZERO,
            maintenance_margin_rate: default_maintenance_margin_rate(),
            fee_rate: Decimal::ZERO,
            enable_circuit_breaker: true,
            cb_max_consecutive_losses: default_cb_losses(),
            cb_cooldown_hours: default_cb_cooldown_hours(),
            cb_drawdown_limit: default_cb_drawdown_limit(),
        }
    }
}

impl BacktestSettings {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| BacktestError::InputValidation(format!("config file: {}", e)))?;
        let settings: Self = toml::from_str(&raw)
            .map_err(|e| BacktestError::InputValidation(format!("config file: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(BacktestError::InputValidation(
                "at least one symbol is required".to_string(),
            ));
        }
        for symbol in &self.symbols {
            if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(BacktestError::InputValidation(format!(
                    "malformed symbol {:?}",
                    symbol
                )));
            }
        }
        if let Some(end) = self.end {
            if end <= self.start {
                return Err(BacktestError::InputValidation(
                    "end must be after start".to_string(),
                ));
            }
        }
        if self.initial_balance <= Decimal::ZERO {
            return Err(BacktestError::InputValidation(
                "initial_balance must be positive".to_string(),
            ));
        }
        if self.risk_per_trade <= Decimal::ZERO || self.risk_per_trade > Decimal::ONE {
            return Err(BacktestError::InputValidation(
                "risk_per_trade must be in (0, 1]".to_string(),
            ));
        }
        if self.leverage < Decimal::ONE {
            return Err(BacktestError::InputValidation(
                "leverage must be at least 1".to_string(),
            ));
        }
        if self.max_positions < 1 {
            return Err(BacktestError::InputValidation(
                "max_positions must be at least 1".to_string(),
            ));
        }
        if self.max_order_value < Decimal::ZERO {
            return Err(BacktestError::InputValidation(
                "max_order_value must not be negative".to_string(),
            ));
        }
        if self.maintenance_margin_rate < Decimal::ZERO {
            return Err(BacktestError::InputValidation(
                "maintenance_margin_rate must not be negative".to_string(),
            ));
        }
        if self.fee_rate < Decimal::ZERO {
            return Err(BacktestError::InputValidation(
                "fee_rate must not be negative".to_string(),
            ));
        }
        if self.cb_max_consecutive_losses < 1 {
            return Err(BacktestError::InputValidation(
                "cb_max_consecutive_losses must be at least 1".to_string(),
            ));
        }
        if self.cb_cooldown_hours < 0 {
            return Err(BacktestError::InputValidation(
                "cb_cooldown_hours must not be negative".to_string(),
            ));
        }
        if self.cb_drawdown_limit <= Decimal::ZERO || self.cb_drawdown_limit > Decimal::ONE {
            return Err(BacktestError::InputValidation(
                "cb_drawdown_limit must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
