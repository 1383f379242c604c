use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{BacktestError, Result};
use crate::types::{Candle, ClosedTrade, ExitReason, Position, Side, TradingSignal};

use super::results::EquityPoint;

/// Resolution order when a stop and a take-profit both sit inside one
/// candle's range. `Pessimistic` resolves like `StopFirst` (assume the
/// worst path through the candle), `Optimistic` like `TpFirst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameCandlePriority {
    StopFirst,
    TpFirst,
    Pessimistic,
    Optimistic,
}

impl SameCandlePriority {
    fn stop_before_tp(&self) -> bool {
        matches!(self, SameCandlePriority::StopFirst | SameCandlePriority::Pessimistic)
    }
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub initial_balance: Decimal,
    /// Fraction of balance risked per trade, in (0, 1].
    pub risk_per_trade: Decimal,
    pub leverage: Decimal,
    pub max_positions: usize,
    /// Notional cap per order; zero disables the cap.
    pub max_order_value: Decimal,
    pub min_notional: Decimal,
    pub maintenance_margin_rate: Decimal,
    /// Taker fee charged on fill and close notional. Zero by default so
    /// ledger PnL stays exact.
    pub fee_rate: Decimal,
    pub max_hold: Duration,
    /// Candles a parked limit order survives without filling.
    pub limit_order_ttl: u32,
    /// TP ladder slice fractions; must sum to 1.
    pub tp_splits: [Decimal; 3],
    pub allow_flip: bool,
    pub same_candle_priority: SameCandlePriority,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            initial_balance: dec!(10000),
            risk_per_trade: dec!(0.01),
            leverage: Decimal::ONE,
            max_positions: 3,
            max_order_value: Decimal::ZERO,
            min_notional: dec!(10),
            maintenance_margin_rate: dec!(0.004),
            fee_rate: Decimal::ZERO,
            max_hold: Duration::hours(4),
            limit_order_ttl: 3,
            tp_splits: [dec!(0.6), dec!(0.3), dec!(0.1)],
            allow_flip: false,
            same_candle_priority: SameCandlePriority::StopFirst,
        }
    }
}

/// A parked limit order waiting for price to reach it.
#[derive(Debug, Clone)]
struct PendingOrder {
    signal: TradingSignal,
    qty: Decimal,
    margin: Decimal,
    ttl: u32,
}

/// Portfolio-aware execution simulator ("shark tank"): every tick, Phase A
/// marks and manages open positions, then Phase B runs admission control
/// over the batch of candidate signals, best confidence first.
#[derive(Debug)]
pub struct ExecutionSimulator {
    config: SimulatorConfig,
    balance: Decimal,
    equity: Decimal,
    peak_equity: Decimal,
    positions: HashMap<String, Position>,
    pending: Vec<PendingOrder>,
    trades: Vec<ClosedTrade>,
    equity_curve: Vec<EquityPoint>,
    marks: HashMap<String, Decimal>,
    next_position_id: u64,
}

impl ExecutionSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            balance,
            equity: balance,
            peak_equity: balance,
            positions: HashMap::new(),
            pending: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            marks: HashMap::new(),
            next_position_id: 1,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self.positions.values().collect();
        positions.sort_by_key(|p| p.id);
        positions
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn pending_order_count(&self) -> usize {
        self.pending.len()
    }

    fn used_margin(&self) -> Decimal {
        let position_margin: Decimal = self.positions.values().map(|p| p.margin).sum();
        let pending_margin: Decimal = self.pending.iter().map(|o| o.margin).sum();
        position_margin + pending_margin
    }

    fn free_margin(&self) -> Decimal {
        self.balance - self.used_margin()
    }

    /// Phase A: fill parked limit orders, then mark and manage every open
    /// position against its candle, then sample the equity curve. Returns
    /// the trades closed at this tick.
    pub fn update(
        &mut self,
        candles: &HashMap<String, Candle>,
        at: DateTime<Utc>,
    ) -> Result<Vec<ClosedTrade>> {
        let trades_before = self.trades.len();

        let mut symbols: Vec<&String> = candles.keys().collect();
        symbols.sort();
        for symbol in &symbols {
            self.marks.insert((*symbol).clone(), candles[*symbol].close);
        }

        self.fill_pending_orders(candles, at)?;

        let mut open_symbols: Vec<String> = self.positions.keys().cloned().collect();
        open_symbols.sort();
        for symbol in open_symbols {
            if let Some(candle) = candles.get(&symbol) {
                self.manage_position(&symbol, candle, at)?;
            }
        }

        self.sample_equity(at)?;
        Ok(self.trades[trades_before..].to_vec())
    }

    fn fill_pending_orders(
        &mut self,
        candles: &HashMap<String, Candle>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        let mut kept = Vec::with_capacity(pending.len());

        for mut order in pending {
            let Some(candle) = candles.get(&order.signal.symbol) else {
                // No candle for this symbol this tick; the clock of the
                // order is measured in its own symbol's candles.
                kept.push(order);
                continue;
            };
            let reached = match order.signal.side {
                Side::Buy => candle.low <= order.signal.entry_price,
                Side::Sell => candle.high >= order.signal.entry_price,
            };

            if reached {
                if self.positions.len() >= self.config.max_positions
                    || self.positions.contains_key(&order.signal.symbol)
                {
                    debug!(
                        "[{}] limit fill dropped: position slots exhausted",
                        order.signal.symbol
                    );
                    continue;
                }
                let entry = order.signal.entry_price;
                let stop = order.signal.stop_loss;
                self.open_position(&order.signal, order.qty, stop, entry, at)?;
            } else {
                order.ttl = order.ttl.saturating_sub(1);
                if order.ttl > 0 {
                    kept.push(order);
                } else {
                    debug!("[{}] limit order expired unfilled", order.signal.symbol);
                }
            }
        }
        self.pending = kept;
        Ok(())
    }

    fn manage_position(
        &mut self,
        symbol: &str,
        candle: &Candle,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut position) = self.positions.remove(symbol) else {
            return Ok(());
        };

        // Liquidation outranks everything on the same candle.
        if position.is_leveraged() {
            if let Some(liq) = position.liquidation_price {
                let reached = match position.side {
                    Side::Buy => candle.low <= liq,
                    Side::Sell => candle.high >= liq,
                };
                if reached {
                    self.close_remainder(&mut position, liq, at, ExitReason::Liquidation)?;
                    return Ok(());
                }
            }
        }

        if self.config.same_candle_priority.stop_before_tp() {
            if !self.try_stop(&mut position, candle, at)? {
                self.try_take_profits(&mut position, candle, at)?;
            }
        } else {
            self.try_take_profits(&mut position, candle, at)?;
            if !position.is_closed() {
                self.try_stop(&mut position, candle, at)?;
            }
        }

        if !position.is_closed() && at - position.opened_at > self.config.max_hold {
            self.close_remainder(&mut position, candle.close, at, ExitReason::Timeout)?;
            return Ok(());
        }

        if !position.is_closed() {
            self.positions.insert(symbol.to_string(), position);
        }
        Ok(())
    }

    /// Returns true when the stop fired (the whole remainder exits at the
    /// stop price).
    fn try_stop(
        &mut self,
        position: &mut Position,
        candle: &Candle,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let stop = position.stop_loss;
        let reached = match position.side {
            Side::Buy => candle.low <= stop,
            Side::Sell => candle.high >= stop,
        };
        if !reached {
            return Ok(false);
        }
        self.close_remainder(position, stop, at, ExitReason::StopLoss)?;
        Ok(true)
    }

    /// Walk TP1..TP3 in order, closing each slice whose level the candle
    /// reached. TP1 trails the stop to break-even; TP2 trails it to TP1.
    fn try_take_profits(
        &mut self,
        position: &mut Position,
        candle: &Candle,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let levels = position.tp_levels.as_array();
        let reasons = [ExitReason::Tp1, ExitReason::Tp2, ExitReason::Tp3];

        for idx in 0..3 {
            let qty = position.remaining_tp_sizes[idx];
            if qty <= Decimal::ZERO {
                continue;
            }
            let reached = match position.side {
                Side::Buy => candle.high >= levels[idx],
                Side::Sell => candle.low <= levels[idx],
            };
            if !reached {
                continue;
            }
            position.remaining_tp_sizes[idx] = Decimal::ZERO;
            self.emit_trade(position, qty, levels[idx], at, reasons[idx])?;
            match idx {
                0 => position.stop_loss = position.entry_price,
                1 => position.stop_loss = position.tp_levels.tp1,
                _ => {}
            }
        }
        Ok(())
    }

    fn close_remainder(
        &mut self,
        position: &mut Position,
        exit_price: Decimal,
        at: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<()> {
        let qty = position.remaining_qty();
        if qty <= Decimal::ZERO {
            return Ok(());
        }
        position.remaining_tp_sizes = [Decimal::ZERO; 3];
        self.emit_trade(position, qty, exit_price, at, reason)
    }

    fn emit_trade(
        &mut self,
        position: &mut Position,
        qty: Decimal,
        exit_price: Decimal,
        at: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<()> {
        if qty <= Decimal::ZERO {
            return Err(BacktestError::ConstraintViolation(format!(
                "non-positive exit quantity {} on position {}",
                qty, position.id
            )));
        }

        let pnl = position.slice_pnl(qty, exit_price);
        let fee = exit_price * qty * self.config.fee_rate;
        self.balance += pnl - fee;

        // Release this slice's share of the reserved margin.
        if position.qty > Decimal::ZERO {
            position.margin -= position.margin_per_unit() * qty;
        }

        if self.balance < Decimal::ZERO {
            return Err(BacktestError::ConstraintViolation(format!(
                "balance went negative ({}) closing position {}",
                self.balance, position.id
            )));
        }

        let direction = match position.side {
            Side::Buy => Decimal::ONE,
            Side::Sell => -Decimal::ONE,
        };
        let pnl_pct = if position.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (exit_price - position.entry_price) / position.entry_price * dec!(100) * direction
        };

        debug!(
            "[{}] {} {} qty {} @ {} (pnl {:.4})",
            position.symbol, reason, position.side, qty, exit_price, pnl
        );

        self.trades.push(ClosedTrade {
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side,
            qty,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.opened_at,
            exit_time: at,
            pnl_usd: pnl,
            pnl_pct,
            exit_reason: reason,
            leverage_at_entry: position.leverage,
            stop_loss_at_entry: position.initial_stop_loss,
        });
        Ok(())
    }

    fn sample_equity(&mut self, at: DateTime<Utc>) -> Result<()> {
        let unrealized: Decimal = self
            .positions
            .iter()
            .map(|(symbol, position)| {
                let mark = self
                    .marks
                    .get(symbol)
                    .copied()
                    .unwrap_or(position.entry_price);
                position.unrealized_pnl(mark)
            })
            .sum();
        self.equity = self.balance + unrealized;

        if let Some(last) = self.equity_curve.last() {
            if last.timestamp >= at {
                return Err(BacktestError::ConstraintViolation(format!(
                    "equity sample at {} not after previous sample at {}",
                    at, last.timestamp
                )));
            }
        }
        self.equity_curve.push(EquityPoint {
            timestamp: at,
            equity: self.equity,
        });
        if self.equity > self.peak_equity {
            self.peak_equity = self.equity;
        }
        Ok(())
    }

    /// Phase B: admission control over a batch of candidate signals.
    ///
    /// Occupied symbols are dropped (or flipped when enabled), survivors are
    /// ranked by confidence, then sized, margin-checked and either parked as
    /// limit orders or filled at market until the position cap is reached.
    pub fn process_batch_signals(
        &mut self,
        signals: Vec<TradingSignal>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut candidates = Vec::with_capacity(signals.len());
        for signal in signals {
            if self
                .pending
                .iter()
                .any(|o| o.signal.symbol == signal.symbol)
            {
                debug!("[{}] dropped: limit order already parked", signal.symbol);
                continue;
            }
            if let Some(existing) = self.positions.get(&signal.symbol) {
                if self.config.allow_flip && existing.side != signal.side {
                    let mark = self
                        .marks
                        .get(&signal.symbol)
                        .copied()
                        .unwrap_or(existing.entry_price);
                    let mut position = self
                        .positions
                        .remove(&signal.symbol)
                        .expect("present: just looked up");
                    debug!("[{}] flip: closing {} at {}", signal.symbol, position.side, mark);
                    self.close_remainder(&mut position, mark, at, ExitReason::Manual)?;
                    candidates.push(signal);
                } else {
                    debug!("[{}] dropped: symbol already has a position", signal.symbol);
                }
                continue;
            }
            candidates.push(signal);
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        for signal in candidates {
            if self.positions.len() + self.pending.len() >= self.config.max_positions {
                debug!("admission stopped: position slots exhausted");
                break;
            }
            self.admit_signal(signal, at)?;
        }
        Ok(())
    }

    fn admit_signal(&mut self, mut signal: TradingSignal, at: DateTime<Utc>) -> Result<()> {
        let entry = signal.entry_price;
        if entry <= Decimal::ZERO {
            debug!("[{}] rejected: non-positive entry", signal.symbol);
            return Ok(());
        }
        let risk_dist = (entry - signal.stop_loss).abs();
        if risk_dist.is_zero() {
            debug!("[{}] rejected: zero stop distance", signal.symbol);
            return Ok(());
        }

        let risk_amount = self.balance * self.config.risk_per_trade;
        let mut notional = risk_amount / risk_dist * entry;
        if self.config.max_order_value > Decimal::ZERO {
            notional = notional.min(self.config.max_order_value);
        }
        if notional < self.config.min_notional {
            debug!(
                "[{}] rejected: notional {:.2} below minimum {:.2}",
                signal.symbol, notional, self.config.min_notional
            );
            return Ok(());
        }
        let qty = notional / entry;
        if qty <= Decimal::ZERO {
            return Err(BacktestError::ConstraintViolation(format!(
                "sizing produced non-positive quantity for {}",
                signal.symbol
            )));
        }

        let margin = notional / self.config.leverage;
        if margin > self.free_margin() {
            debug!(
                "[{}] rejected: margin {:.2} exceeds free margin {:.2}",
                signal.symbol,
                margin,
                self.free_margin()
            );
            return Ok(());
        }

        if let Some(liq) = self.liquidation_price(signal.side, entry) {
            // Liquidation sitting between entry and stop would mean the
            // exchange takes us out before our own stop. Pull the stop one
            // tick safer, or reject when that ruins the trade's R:R.
            let needs_pull = match signal.side {
                Side::Buy => signal.stop_loss < liq && liq < entry,
                Side::Sell => signal.stop_loss > liq && liq > entry,
            };
            if needs_pull {
                let tick = entry * dec!(0.0001);
                let pulled = match signal.side {
                    Side::Buy => liq + tick,
                    Side::Sell => liq - tick,
                };
                let new_risk = (entry - pulled).abs();
                if new_risk.is_zero() {
                    debug!("[{}] rejected: liquidation hugs the entry", signal.symbol);
                    return Ok(());
                }
                let rr = (signal.tp_levels.tp1 - entry).abs() / new_risk;
                if rr < Decimal::ONE {
                    debug!(
                        "[{}] rejected: stop pulled to {:.4} drops R:R below 1",
                        signal.symbol, pulled
                    );
                    return Ok(());
                }
                debug!(
                    "[{}] stop pulled from {:.4} to {:.4} (liquidation at {:.4})",
                    signal.symbol, signal.stop_loss, pulled, liq
                );
                signal.stop_loss = pulled;
            }
        }

        if signal.is_limit_order {
            debug!(
                "[{}] limit order parked at {:.4} ({} candle ttl)",
                signal.symbol, entry, self.config.limit_order_ttl
            );
            self.pending.push(PendingOrder {
                signal,
                qty,
                margin,
                ttl: self.config.limit_order_ttl,
            });
        } else {
            let stop = signal.stop_loss;
            self.open_position(&signal, qty, stop, entry, at)?;
        }
        Ok(())
    }

    fn liquidation_price(&self, side: Side, entry: Decimal) -> Option<Decimal> {
        if self.config.leverage <= Decimal::ONE {
            return None;
        }
        let inv = Decimal::ONE / self.config.leverage;
        Some(match side {
            Side::Buy => entry * (Decimal::ONE - inv + self.config.maintenance_margin_rate),
            Side::Sell => entry * (Decimal::ONE + inv - self.config.maintenance_margin_rate),
        })
    }

    fn open_position(
        &mut self,
        signal: &TradingSignal,
        qty: Decimal,
        stop_loss: Decimal,
        fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if qty <= Decimal::ZERO {
            return Err(BacktestError::ConstraintViolation(format!(
                "attempted to open {} with non-positive quantity",
                signal.symbol
            )));
        }

        let notional = qty * fill_price;
        let margin = notional / self.config.leverage;
        let fee = notional * self.config.fee_rate;
        self.balance -= fee;
        if self.balance < Decimal::ZERO {
            return Err(BacktestError::ConstraintViolation(
                "entry fee drove balance negative".to_string(),
            ));
        }

        let q1 = qty * self.config.tp_splits[0];
        let q2 = qty * self.config.tp_splits[1];
        let q3 = qty - q1 - q2;

        let id = self.next_position_id;
        self.next_position_id += 1;

        let position = Position {
            id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            qty,
            entry_price: fill_price,
            stop_loss,
            initial_stop_loss: stop_loss,
            tp_levels: signal.tp_levels,
            remaining_tp_sizes: [q1, q2, q3],
            leverage: self.config.leverage,
            notional,
            margin,
            opened_at: at,
            liquidation_price: self.liquidation_price(signal.side, fill_price),
        };

        debug!(
            "[{}] opened {} #{}: qty {} @ {} (notional {:.2}, margin {:.2}, liq {:?})",
            position.symbol,
            position.side,
            position.id,
            position.qty,
            position.entry_price,
            position.notional,
            position.margin,
            position.liquidation_price,
        );
        self.positions.insert(signal.symbol.clone(), position);
        Ok(())
    }
}

impl Position {
    fn margin_per_unit(&self) -> Decimal {
        if self.qty.is_zero() {
            Decimal::ZERO
        } else {
            // Margin was reserved against the original notional, so the
            // per-unit share is constant over the position's life.
            (self.notional / self.leverage) / self.qty
        }
    }
}
