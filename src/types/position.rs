#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Side, TpLevels};

/// Why a trade (or a slice of one) left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "TP1")]
    Tp1,
    #[serde(rename = "TP2")]
    Tp2,
    #[serde(rename = "TP3")]
    Tp3,
    #[serde(rename = "STOP_LOSS")]
    StopLoss,
    #[serde(rename = "LIQUIDATION")]
    Liquidation,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "MANUAL")]
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Tp1 => "TP1",
            ExitReason::Tp2 => "TP2",
            ExitReason::Tp3 => "TP3",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::Liquidation => "LIQUIDATION",
            ExitReason::Timeout => "TIMEOUT",
            ExitReason::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An open position. Exactly one per symbol at any time; mutated only by
/// the execution simulator. Ids are sequential so runs are reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    /// Original fill quantity; the live remainder is `remaining_qty()`.
    pub qty: Decimal,
    pub entry_price: Decimal,
    /// Current stop. Trails to entry after TP1 and to TP1 after TP2.
    pub stop_loss: Decimal,
    /// Stop at fill time, kept for R:R accounting.
    pub initial_stop_loss: Decimal,
    pub tp_levels: TpLevels,
    /// Remaining quantity per TP slice (60/30/10 of `qty` by default);
    /// a fired level drops to zero.
    pub remaining_tp_sizes: [Decimal; 3],
    pub leverage: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    pub opened_at: DateTime<Utc>,
    pub liquidation_price: Option<Decimal>,
}

impl Position {
    pub fn remaining_qty(&self) -> Decimal {
        self.remaining_tp_sizes.iter().copied().sum()
    }

    pub fn is_closed(&self) -> bool {
        self.remaining_qty() <= Decimal::ZERO
    }

    pub fn is_leveraged(&self) -> bool {
        self.leverage > Decimal::ONE
    }

    /// Signed PnL of the live remainder at `mark`.
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        let diff = mark - self.entry_price;
        let qty = self.remaining_qty();
        match self.side {
            Side::Buy => diff * qty,
            Side::Sell => -diff * qty,
        }
    }

    /// Signed PnL for a `qty`-sized slice exiting at `exit_price`.
    pub fn slice_pnl(&self, qty: Decimal, exit_price: Decimal) -> Decimal {
        let diff = exit_price - self.entry_price;
        match self.side {
            Side::Buy => diff * qty,
            Side::Sell => -diff * qty,
        }
    }
}

/// Append-only ledger record of a completed trade (or partial exit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub position_id: u64,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl_usd: Decimal,
    pub pnl_pct: Decimal,
    pub exit_reason: ExitReason,
    pub leverage_at_entry: Decimal,
    /// Stop at fill time; risk per trade = |entry - stop| * qty.
    pub stop_loss_at_entry: Decimal,
}

impl ClosedTrade {
    pub fn risk_usd(&self) -> Decimal {
        (self.entry_price - self.stop_loss_at_entry).abs() * self.qty
    }

    pub fn is_win(&self) -> bool {
        self.pnl_usd > Decimal::ZERO
    }
}
