#![allow(dead_code)]
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::types::Side;

/// Risk gate against overtrading and revenge trading.
///
/// Two layers: a per-(symbol, side) block after N consecutive losses, and a
/// global halt when the portfolio draws down too far within one UTC day.
/// Every comparison uses the timeline clock handed in by the engine; wall
/// time never appears here.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_consecutive_losses: u32,
    pub cooldown: Duration,
    /// Fraction of the daily starting balance, e.g. 0.10 for 10%.
    pub max_daily_drawdown: Decimal,
    pub global_halt: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 3,
            cooldown: Duration::hours(4),
            max_daily_drawdown: dec!(0.10),
            global_halt: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SideState {
    consecutive_losses: u32,
    blocked_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: HashMap<(String, Side), SideState>,
    daily_start_balance: Decimal,
    current_day: Option<NaiveDate>,
    global_blocked_until: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
            daily_start_balance: Decimal::ZERO,
            current_day: None,
            global_blocked_until: None,
        }
    }

    /// Called once per tick with the portfolio equity. Rolls the daily
    /// anchor at UTC midnight (an active block survives the roll) and arms
    /// the global halt when the intraday drawdown crosses the limit.
    pub fn update_portfolio_state(&mut self, equity: Decimal, at: DateTime<Utc>) {
        let day = at.date_naive();
        if self.current_day != Some(day) {
            self.current_day = Some(day);
            self.daily_start_balance = equity;
        }

        if self.daily_start_balance <= Decimal::ZERO {
            return;
        }
        let drawdown = (self.daily_start_balance - equity) / self.daily_start_balance;
        if drawdown >= self.config.max_daily_drawdown {
            let already_blocked = self
                .global_blocked_until
                .map_or(false, |until| at < until);
            if !already_blocked {
                let until = at + self.config.global_halt;
                self.global_blocked_until = Some(until);
                warn!(
                    "GLOBAL CIRCUIT BREAKER: daily drawdown {:.2}% >= {:.2}%, halting all entries until {}",
                    drawdown * dec!(100),
                    self.config.max_daily_drawdown * dec!(100),
                    until
                );
            }
        }
    }

    /// Record a completed trade at timeline time `at`. A win clears the
    /// side's streak and block; a loss extends the streak and arms the
    /// cooldown once it reaches the limit.
    pub fn record_trade(&mut self, symbol: &str, side: Side, pnl: Decimal, at: DateTime<Utc>) {
        let state = self
            .state
            .entry((symbol.to_uppercase(), side))
            .or_default();

        if pnl > Decimal::ZERO {
            state.consecutive_losses = 0;
            state.blocked_until = None;
        } else {
            state.consecutive_losses += 1;
            if state.consecutive_losses >= self.config.max_consecutive_losses {
                let until = at + self.config.cooldown;
                state.blocked_until = Some(until);
                info!(
                    "circuit breaker: {} {} blocked until {} after {} consecutive losses",
                    symbol, side, until, state.consecutive_losses
                );
            }
        }
    }

    /// Whether entries for (symbol, side) are blocked at timeline time `at`.
    pub fn is_blocked(&self, symbol: &str, side: Side, at: DateTime<Utc>) -> bool {
        if let Some(until) = self.global_blocked_until {
            if at < until {
                return true;
            }
        }
        self.state
            .get(&(symbol.to_uppercase(), side))
            .and_then(|s| s.blocked_until)
            .map_or(false, |until| at < until)
    }

    pub fn is_globally_blocked(&self, at: DateTime<Utc>) -> bool {
        self.global_blocked_until.map_or(false, |until| at < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn three_losses_block_one_side_for_the_cooldown() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let t = at(0);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        assert!(!cb.is_blocked("BNBUSDT", Side::Buy, t));
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);

        assert!(cb.is_blocked("BNBUSDT", Side::Buy, t));
        assert!(cb.is_blocked("BNBUSDT", Side::Buy, at(3)));
        // Boundary: free again exactly at T + cooldown.
        assert!(!cb.is_blocked("BNBUSDT", Side::Buy, at(4)));
        // The other side and other symbols stay free.
        assert!(!cb.is_blocked("BNBUSDT", Side::Sell, t));
        assert!(!cb.is_blocked("SOLUSDT", Side::Buy, t));
    }

    #[test]
    fn win_resets_the_streak() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let t = at(0);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(5), t);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        cb.record_trade("BNBUSDT", Side::Buy, dec!(-10), t);
        assert!(!cb.is_blocked("BNBUSDT", Side::Buy, t));
    }

    #[test]
    fn breakeven_counts_as_a_loss() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        let t = at(0);
        for _ in 0..3 {
            cb.record_trade("BNBUSDT", Side::Sell, Decimal::ZERO, t);
        }
        assert!(cb.is_blocked("BNBUSDT", Side::Sell, t));
    }

    #[test]
    fn intraday_drawdown_arms_the_global_halt() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.update_portfolio_state(dec!(10000), at(0));
        assert!(!cb.is_globally_blocked(at(0)));

        cb.update_portfolio_state(dec!(8999), at(2));
        assert!(cb.is_globally_blocked(at(2)));
        // Every (symbol, side) pair is swept up in the halt.
        assert!(cb.is_blocked("ANYUSDT", Side::Buy, at(2)));
        assert!(cb.is_blocked("ANYUSDT", Side::Sell, at(10)));
        assert!(cb.is_blocked("ANYUSDT", Side::Buy, at(25)));
        assert!(!cb.is_blocked("ANYUSDT", Side::Buy, at(26)));
    }

    #[test]
    fn small_drawdown_does_not_halt() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.update_portfolio_state(dec!(10000), at(0));
        cb.update_portfolio_state(dec!(9001), at(2));
        assert!(!cb.is_globally_blocked(at(2)));
    }

    #[test]
    fn new_day_resets_anchor_but_keeps_active_block() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        cb.update_portfolio_state(dec!(10000), at(0));
        cb.update_portfolio_state(dec!(8900), at(20));
        assert!(cb.is_globally_blocked(at(20)));

        // Next UTC day: anchor re-bases to current equity, yet the halt
        // armed at hour 20 runs to hour 44.
        cb.update_portfolio_state(dec!(8900), at(25));
        assert!(cb.is_globally_blocked(at(25)));
        assert!(cb.is_globally_blocked(at(43)));
        assert!(!cb.is_globally_blocked(at(44)));

        // Re-based anchor: a flat day does not re-arm.
        cb.update_portfolio_state(dec!(8900), at(45));
        assert!(!cb.is_globally_blocked(at(45)));
    }
}
