use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::{Candle, ClosedTrade, ExitReason};

/// One equity-curve sample; exactly one per timeline tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Counts per exit reason across the closed-trade ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitBreakdown {
    pub tp1: u64,
    pub tp2: u64,
    pub tp3: u64,
    pub stop_loss: u64,
    pub liquidation: u64,
    pub timeout: u64,
    pub manual: u64,
}

impl ExitBreakdown {
    fn record(&mut self, reason: ExitReason) {
        match reason {
            ExitReason::Tp1 => self.tp1 += 1,
            ExitReason::Tp2 => self.tp2 += 1,
            ExitReason::Tp3 => self.tp3 += 1,
            ExitReason::StopLoss => self.stop_loss += 1,
            ExitReason::Liquidation => self.liquidation += 1,
            ExitReason::Timeout => self.timeout += 1,
            ExitReason::Manual => self.manual += 1,
        }
    }
}

/// Per-symbol trade statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolStats {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub net_pnl: Decimal,
    pub win_rate_pct: Decimal,
}

impl SymbolStats {
    fn new() -> Self {
        Self {
            trades: 0,
            wins: 0,
            losses: 0,
            net_pnl: Decimal::ZERO,
            win_rate_pct: Decimal::ZERO,
        }
    }

    fn add_trade(&mut self, pnl: Decimal) {
        self.trades += 1;
        self.net_pnl += pnl;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
        self.win_rate_pct = Decimal::from(self.wins) / Decimal::from(self.trades) * dec!(100);
    }
}

/// The standard metric bundle computed from the closed-trade ledger and the
/// equity curve. Every field is finite: the infinite-profit-factor case is
/// encoded as `None` and serializes as JSON `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub initial_balance: Decimal,
    pub final_equity: Decimal,

    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub win_rate_pct: Decimal,

    pub total_pnl: Decimal,
    pub total_pnl_pct: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_trade_pnl: Decimal,
    pub avg_rr_ratio: Decimal,

    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub sharpe_ratio: Decimal,
    /// `None` encodes "+infinity": gross profit with zero gross loss.
    pub profit_factor: Option<Decimal>,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,

    pub exit_breakdown: ExitBreakdown,
    pub symbol_stats: BTreeMap<String, SymbolStats>,
}

impl PerformanceReport {
    /// Console summary in the ledger's own terms.
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                  BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Initial Balance:    ${:.2}", self.initial_balance);
        println!("Final Equity:       ${:.2}", self.final_equity);
        println!("Total P&L:          ${:.2} ({:.2}%)", self.total_pnl, self.total_pnl_pct);
        println!("{}", "-".repeat(60));
        println!("TRADES");
        println!("  Total:            {}", self.total_trades);
        println!("  Winning:          {} ({:.1}%)", self.winning_trades, self.win_rate_pct);
        println!("  Losing:           {}", self.losing_trades);
        println!("  Avg Win:          ${:.2}", self.avg_win);
        println!("  Avg Loss:         ${:.2}", self.avg_loss);
        println!("  Avg R:R:          {:.2}", self.avg_rr_ratio);
        match self.profit_factor {
            Some(pf) => println!("  Profit Factor:    {:.2}", pf),
            None => println!("  Profit Factor:    inf"),
        }
        println!("{}", "-".repeat(60));
        println!("RISK");
        println!("  Max Drawdown:     ${:.2} ({:.2}%)", self.max_drawdown, self.max_drawdown_pct);
        println!("  Sharpe Ratio:     {:.2}", self.sharpe_ratio);
        println!("{}", "-".repeat(60));
        println!("EXITS");
        println!(
            "  TP1 {} | TP2 {} | TP3 {} | SL {} | LIQ {} | TIMEOUT {} | MANUAL {}",
            self.exit_breakdown.tp1,
            self.exit_breakdown.tp2,
            self.exit_breakdown.tp3,
            self.exit_breakdown.stop_loss,
            self.exit_breakdown.liquidation,
            self.exit_breakdown.timeout,
            self.exit_breakdown.manual,
        );
        if !self.symbol_stats.is_empty() {
            println!("{}", "-".repeat(60));
            println!("BY SYMBOL");
            for (symbol, stats) in &self.symbol_stats {
                println!(
                    "  {}: {} trades, {:.1}% win rate, ${:.2} net P&L",
                    symbol, stats.trades, stats.win_rate_pct, stats.net_pnl
                );
            }
        }
        println!("{}", "=".repeat(60));
    }
}

/// Per-symbol chart overlays; undefined warmup slots are `null`, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolOverlays {
    pub bb_upper: Vec<Option<Decimal>>,
    pub bb_lower: Vec<Option<Decimal>>,
    pub vwap: Vec<Option<Decimal>>,
    pub limit_buy: Vec<Option<Decimal>>,
    pub limit_sell: Vec<Option<Decimal>>,
}

/// Everything a backtest run returns: the audited ledger, the equity curve,
/// the metric bundle, and per-symbol candles with visualization overlays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub symbols: Vec<String>,
    pub stats: PerformanceReport,
    pub trades: Vec<ClosedTrade>,
    pub equity: Vec<EquityPoint>,
    pub candles: HashMap<String, Vec<Candle>>,
    pub indicators: HashMap<String, SymbolOverlays>,
}

/// Closed-trade and equity-curve statistics.
pub struct PerformanceAnalyzer {
    /// Sharpe annualization: sqrt of the number of return periods per year.
    pub annualization_periods: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self {
            annualization_periods: 252.0,
        }
    }
}

impl PerformanceAnalyzer {
    pub fn with_annualization(annualization_periods: f64) -> Self {
        Self {
            annualization_periods,
        }
    }

    pub fn analyze(
        &self,
        trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        initial_balance: Decimal,
    ) -> PerformanceReport {
        let total_trades = trades.len() as u64;
        let wins: Vec<&ClosedTrade> = trades.iter().filter(|t| t.pnl_usd > Decimal::ZERO).collect();
        let losses: Vec<&ClosedTrade> =
            trades.iter().filter(|t| t.pnl_usd <= Decimal::ZERO).collect();

        let gross_profit: Decimal = wins.iter().map(|t| t.pnl_usd).sum();
        let gross_loss: Decimal = losses.iter().map(|t| t.pnl_usd.abs()).sum();

        let win_rate_pct = if total_trades > 0 {
            Decimal::from(wins.len() as u64) / Decimal::from(total_trades) * dec!(100)
        } else {
            Decimal::ZERO
        };

        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            gross_profit / Decimal::from(wins.len() as u64)
        };
        let avg_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            // Signed mean of non-positive PnL.
            losses.iter().map(|t| t.pnl_usd).sum::<Decimal>() / Decimal::from(losses.len() as u64)
        };

        let total_pnl: Decimal = trades.iter().map(|t| t.pnl_usd).sum();
        let total_pnl_pct = if initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            total_pnl / initial_balance * dec!(100)
        };
        let avg_trade_pnl = if total_trades > 0 {
            total_pnl / Decimal::from(total_trades)
        } else {
            Decimal::ZERO
        };

        // Mean of pnl / risk over trades with positive risk.
        let rr_values: Vec<Decimal> = trades
            .iter()
            .filter_map(|t| {
                let risk = t.risk_usd();
                if risk > Decimal::ZERO {
                    Some(t.pnl_usd / risk)
                } else {
                    None
                }
            })
            .collect();
        let avg_rr_ratio = if rr_values.is_empty() {
            Decimal::ZERO
        } else {
            rr_values.iter().copied().sum::<Decimal>() / Decimal::from(rr_values.len() as u64)
        };

        let (max_drawdown, max_drawdown_pct) =
            Self::max_drawdown(equity_curve, initial_balance);
        let sharpe_ratio = self.sharpe(equity_curve);

        let profit_factor = if gross_loss.is_zero() {
            if gross_profit > Decimal::ZERO {
                None
            } else {
                Some(Decimal::ZERO)
            }
        } else {
            Some(gross_profit / gross_loss)
        };

        let mut exit_breakdown = ExitBreakdown::default();
        let mut symbol_stats: BTreeMap<String, SymbolStats> = BTreeMap::new();
        for trade in trades {
            exit_breakdown.record(trade.exit_reason);
            symbol_stats
                .entry(trade.symbol.clone())
                .or_insert_with(SymbolStats::new)
                .add_trade(trade.pnl_usd);
        }

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_balance);

        PerformanceReport {
            initial_balance,
            final_equity,
            total_trades,
            winning_trades: wins.len() as u64,
            losing_trades: losses.len() as u64,
            win_rate_pct,
            total_pnl,
            total_pnl_pct,
            avg_win,
            avg_loss,
            avg_trade_pnl,
            avg_rr_ratio,
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio,
            profit_factor,
            gross_profit,
            gross_loss,
            exit_breakdown,
            symbol_stats,
        }
    }

    /// Max over the curve of `running_peak - value`, plus its percent of
    /// the initial balance.
    fn max_drawdown(equity_curve: &[EquityPoint], initial_balance: Decimal) -> (Decimal, Decimal) {
        let Some(first) = equity_curve.first() else {
            return (Decimal::ZERO, Decimal::ZERO);
        };
        let mut peak = first.equity;
        let mut max_dd = Decimal::ZERO;
        for point in equity_curve {
            if point.equity > peak {
                peak = point.equity;
            }
            let drawdown = peak - point.equity;
            if drawdown > max_dd {
                max_dd = drawdown;
            }
        }
        let pct = if initial_balance.is_zero() {
            Decimal::ZERO
        } else {
            max_dd / initial_balance * dec!(100)
        };
        (max_dd, pct)
    }

    /// Sharpe over per-step equity returns, annualized. Zero when the
    /// return deviation is zero; never NaN.
    fn sharpe(&self, equity_curve: &[EquityPoint]) -> Decimal {
        if equity_curve.len() < 2 {
            return Decimal::ZERO;
        }
        let values: Vec<f64> = equity_curve
            .iter()
            .map(|p| p.equity.try_into().unwrap_or(0.0))
            .collect();
        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.is_empty() {
            return Decimal::ZERO;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return Decimal::ZERO;
        }

        let sharpe = mean / std_dev * self.annualization_periods.sqrt();
        Decimal::try_from(sharpe).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use chrono::TimeZone;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn trade(symbol: &str, pnl: Decimal, reason: ExitReason) -> ClosedTrade {
        ClosedTrade {
            position_id: 1,
            symbol: symbol.to_string(),
            side: Side::Buy,
            qty: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            entry_time: at(0),
            exit_time: at(15),
            pnl_usd: pnl,
            pnl_pct: pnl,
            exit_reason: reason,
            leverage_at_entry: Decimal::ONE,
            stop_loss_at_entry: dec!(98),
        }
    }

    fn curve(values: &[Decimal]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, equity)| EquityPoint {
                timestamp: at(i as i64 * 15),
                equity: *equity,
            })
            .collect()
    }

    #[test]
    fn counts_and_win_rate() {
        let trades = vec![
            trade("BNBUSDT", dec!(10), ExitReason::Tp1),
            trade("BNBUSDT", dec!(-5), ExitReason::StopLoss),
            trade("SOLUSDT", dec!(20), ExitReason::Tp2),
            trade("SOLUSDT", Decimal::ZERO, ExitReason::Timeout),
        ];
        let report = PerformanceAnalyzer::default().analyze(
            &trades,
            &curve(&[dec!(10000), dec!(10025)]),
            dec!(10000),
        );
        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        // Zero PnL counts as a loss.
        assert_eq!(report.losing_trades, 2);
        assert_eq!(report.win_rate_pct, dec!(50));
        assert_eq!(report.gross_profit, dec!(30));
        assert_eq!(report.gross_loss, dec!(5));
        assert_eq!(report.profit_factor, Some(dec!(6)));
        assert_eq!(report.avg_win, dec!(15));
        assert_eq!(report.avg_loss, dec!(-2.5));
        assert_eq!(report.exit_breakdown.tp1, 1);
        assert_eq!(report.exit_breakdown.stop_loss, 1);
        assert_eq!(report.exit_breakdown.timeout, 1);
        assert_eq!(report.symbol_stats["SOLUSDT"].trades, 2);
    }

    #[test]
    fn profit_factor_infinity_is_none() {
        let trades = vec![trade("BNBUSDT", dec!(10), ExitReason::Tp1)];
        let report = PerformanceAnalyzer::default().analyze(
            &trades,
            &curve(&[dec!(10000), dec!(10010)]),
            dec!(10000),
        );
        assert_eq!(report.profit_factor, None);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["profit_factor"].is_null());
    }

    #[test]
    fn flat_curve_has_zero_sharpe_and_drawdown() {
        let report = PerformanceAnalyzer::default().analyze(
            &[],
            &curve(&[dec!(10000), dec!(10000), dec!(10000)]),
            dec!(10000),
        );
        assert_eq!(report.sharpe_ratio, Decimal::ZERO);
        assert_eq!(report.max_drawdown, Decimal::ZERO);
        assert_eq!(report.profit_factor, Some(Decimal::ZERO));
        assert_eq!(report.win_rate_pct, Decimal::ZERO);
    }

    #[test]
    fn drawdown_measured_from_running_peak() {
        let report = PerformanceAnalyzer::default().analyze(
            &[],
            &curve(&[dec!(10000), dec!(11000), dec!(9500), dec!(10500)]),
            dec!(10000),
        );
        assert_eq!(report.max_drawdown, dec!(1500));
        assert_eq!(report.max_drawdown_pct, dec!(15));
    }

    #[test]
    fn avg_rr_uses_entry_risk() {
        // Risk = |100 - 98| * 1 = 2 per trade.
        let trades = vec![
            trade("BNBUSDT", dec!(4), ExitReason::Tp1),  // rr 2
            trade("BNBUSDT", dec!(-2), ExitReason::StopLoss), // rr -1
        ];
        let report = PerformanceAnalyzer::default().analyze(
            &trades,
            &curve(&[dec!(10000), dec!(10002)]),
            dec!(10000),
        );
        assert_eq!(report.avg_rr_ratio, dec!(0.5));
    }

    #[test]
    fn sharpe_positive_for_steady_gains() {
        let report = PerformanceAnalyzer::default().analyze(
            &[],
            &curve(&[dec!(10000), dec!(10100), dec!(10150), dec!(10300)]),
            dec!(10000),
        );
        assert!(report.sharpe_ratio > Decimal::ZERO);
    }
}
