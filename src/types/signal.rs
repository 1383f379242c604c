#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Side;

/// The three-level take-profit ladder attached to every signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TpLevels {
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub tp3: Decimal,
}

impl TpLevels {
    pub fn as_array(&self) -> [Decimal; 3] {
        [self.tp1, self.tp2, self.tp3]
    }
}

/// A limit-order trade proposal emitted by the signal generator and consumed
/// by the execution simulator's admission control. Discarded if not admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub side: Side,
    pub generated_at: DateTime<Utc>,
    /// Close price of the candle that produced the signal.
    pub reference_price: Decimal,
    /// Limit price (or market fill price when `is_limit_order` is false).
    pub entry_price: Decimal,
    pub is_limit_order: bool,
    pub stop_loss: Decimal,
    pub tp_levels: TpLevels,
    pub risk_reward_ratio: Decimal,
    /// Ranking score used by admission control, in [0, 1].
    pub confidence: Decimal,
    pub reasons: Vec<String>,
    /// Indicator snapshot for auditing (ATR, VWAP, SFP confidence, ...).
    pub indicators: BTreeMap<String, Decimal>,
}

impl TradingSignal {
    /// Price-level ordering invariant:
    /// BUY: `stop < entry < tp1 <= tp2 <= tp3`; SELL reversed.
    pub fn levels_are_ordered(&self) -> bool {
        let tp = &self.tp_levels;
        match self.side {
            Side::Buy => {
                self.stop_loss < self.entry_price
                    && self.entry_price < tp.tp1
                    && tp.tp1 <= tp.tp2
                    && tp.tp2 <= tp.tp3
            }
            Side::Sell => {
                self.stop_loss > self.entry_price
                    && self.entry_price > tp.tp1
                    && tp.tp1 >= tp.tp2
                    && tp.tp2 >= tp.tp3
            }
        }
    }

    pub fn risk_per_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }
}
