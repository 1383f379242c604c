use chrono::{DateTime, Duration, Utc};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::BacktestSettings;
use crate::data::MarketDataLoader;
use crate::error::{BacktestError, Result};
use crate::indicators::{bollinger_series, rolling_extremes, session_vwap_series};
use crate::risk::{CircuitBreaker, CircuitBreakerConfig};
use crate::strategies::{
    MarketContext, PullbackSignalGenerator, SignalGenerator, StrategyKind, StrategyRegistry,
    TrendFilter,
};
use crate::types::{CandleSeries, Side, TradingSignal, TrendBias};

use super::results::{BacktestReport, PerformanceAnalyzer, SymbolOverlays};
use super::simulator::{ExecutionSimulator, SimulatorConfig};

/// Extra HTF history loaded ahead of the backtest window so the EMA-200
/// bias has samples from the first tick.
const HTF_WARMUP_DAYS: i64 = 60;
/// Rolling window for the sniper limit-line overlays.
const OVERLAY_SWING_WINDOW: usize = 20;

/// Timeline driver for the deterministic backtest loop.
///
/// Single-threaded: ticks are visited in strict ascending timestamp order
/// and no step observes state from a later step. Only the data loader runs
/// concurrently, before the loop begins.
pub struct BacktestEngine<L> {
    loader: L,
    settings: BacktestSettings,
    registry: StrategyRegistry,
    signal_generator: SignalGenerator,
    pullback_generator: PullbackSignalGenerator,
    trend_filter: TrendFilter,
    cancel: Arc<AtomicBool>,
}

impl<L: MarketDataLoader> BacktestEngine<L> {
    pub fn new(loader: L, settings: BacktestSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            loader,
            settings,
            registry: StrategyRegistry::builtin(),
            signal_generator: SignalGenerator::default(),
            pullback_generator: PullbackSignalGenerator::default(),
            trend_filter: TrendFilter::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Cooperative cancellation flag, checked between ticks. A cancelled
    /// run finishes its current tick and reports on the data so far.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub async fn run_portfolio(&self) -> Result<BacktestReport> {
        let settings = &self.settings;
        let start = settings.start;
        let end = settings.end.unwrap_or_else(Utc::now);

        info!(
            "loading {} timeline for {} symbols: {} -> {}",
            settings.interval,
            settings.symbols.len(),
            start,
            end
        );
        let ltf_timeline = self
            .loader
            .load_portfolio_data(&settings.symbols, settings.interval, start, end)
            .await?;
        if ltf_timeline.is_empty() {
            return Err(BacktestError::NoData);
        }

        let htf_start = start - Duration::days(HTF_WARMUP_DAYS);
        let htf_timeline = self
            .loader
            .load_portfolio_data(&settings.symbols, settings.htf_interval, htf_start, end)
            .await?;

        info!(
            "starting backtest: {} ticks, HTF {} ({} ticks)",
            ltf_timeline.len(),
            settings.htf_interval,
            htf_timeline.len()
        );

        let mut simulator = ExecutionSimulator::new(SimulatorConfig {
            initial_balance: settings.initial_balance,
            risk_per_trade: settings.risk_per_trade,
            leverage: settings.leverage,
            max_positions: settings.max_positions,
            max_order_value: settings.max_order_value,
            maintenance_margin_rate: settings.maintenance_margin_rate,
            fee_rate: settings.fee_rate,
            ..SimulatorConfig::default()
        });
        let mut circuit_breaker = settings.enable_circuit_breaker.then(|| {
            CircuitBreaker::new(CircuitBreakerConfig {
                max_consecutive_losses: settings.cb_max_consecutive_losses,
                cooldown: Duration::hours(settings.cb_cooldown_hours),
                max_daily_drawdown: settings.cb_drawdown_limit,
                ..CircuitBreakerConfig::default()
            })
        });

        let mut ltf_histories: HashMap<String, CandleSeries> = settings
            .symbols
            .iter()
            .map(|s| (s.clone(), CandleSeries::new()))
            .collect();
        let mut htf_histories: HashMap<String, CandleSeries> = settings
            .symbols
            .iter()
            .map(|s| (s.clone(), CandleSeries::new()))
            .collect();

        let ltf_ticks: Vec<DateTime<Utc>> = ltf_timeline.keys().copied().collect();
        let htf_ticks: Vec<DateTime<Utc>> = htf_timeline.keys().copied().collect();
        let mut htf_ptr = 0usize;

        for (step, ts) in ltf_ticks.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("backtest cancelled at tick {} of {}", step, ltf_ticks.len());
                break;
            }
            let ts = *ts;

            // Advance the HTF pointer up to the current moment.
            while htf_ptr < htf_ticks.len() && htf_ticks[htf_ptr] <= ts {
                let htf_map = &htf_timeline[&htf_ticks[htf_ptr]];
                for symbol in &settings.symbols {
                    if let Some(candle) = htf_map.get(symbol) {
                        if let Some(history) = htf_histories.get_mut(symbol) {
                            history.push(candle.clone());
                        }
                    }
                }
                htf_ptr += 1;
            }

            let tick_map = &ltf_timeline[&ts];
            for symbol in &settings.symbols {
                if let Some(candle) = tick_map.get(symbol) {
                    if let Some(history) = ltf_histories.get_mut(symbol) {
                        history.push(candle.clone());
                    }
                }
            }

            let bias_map: HashMap<&String, TrendBias> = settings
                .symbols
                .iter()
                .map(|symbol| {
                    let history = &htf_histories[symbol];
                    (symbol, self.trend_filter.get_trend_direction(history.as_slice()))
                })
                .collect();

            // Phase A: mark-to-market, fills, exits.
            let closed_now = simulator.update(tick_map, ts)?;

            if let Some(cb) = circuit_breaker.as_mut() {
                for trade in &closed_now {
                    cb.record_trade(&trade.symbol, trade.side, trade.pnl_usd, ts);
                }
                cb.update_portfolio_state(simulator.equity(), ts);
            }

            // Signal generation over symbols present at this tick.
            let mut batch: Vec<TradingSignal> = Vec::new();
            for symbol in &settings.symbols {
                if !tick_map.contains_key(symbol) {
                    continue;
                }
                let history = &ltf_histories[symbol];
                if history.len() < settings.warmup_candles {
                    continue;
                }
                if let Some(cb) = circuit_breaker.as_ref() {
                    let long_blocked = cb.is_blocked(symbol, Side::Buy, ts);
                    let short_blocked = cb.is_blocked(symbol, Side::Sell, ts);
                    if long_blocked && short_blocked {
                        continue;
                    }
                }

                let bias = bias_map.get(symbol).copied().unwrap_or(TrendBias::Neutral);
                let Some(ctx) = MarketContext::prepare(history.as_slice(), bias) else {
                    continue;
                };
                let config = self.registry.config_for(symbol);
                let generated = match config.strategy {
                    StrategyKind::LiquiditySniper => {
                        self.signal_generator.generate(&ctx, config, symbol)
                    }
                    StrategyKind::TrendPullback => {
                        self.pullback_generator.generate(&ctx, config, symbol)
                    }
                };
                if let Some(signal) = generated {
                    let side_blocked = circuit_breaker
                        .as_ref()
                        .map(|cb| cb.is_blocked(symbol, signal.side, ts))
                        .unwrap_or(false);
                    if !side_blocked {
                        batch.push(signal);
                    }
                }
            }

            // Phase B: admission control.
            if !batch.is_empty() {
                simulator.process_batch_signals(batch, ts)?;
            }

            if step % 1000 == 0 {
                info!(
                    "progress: {}/{} ticks, equity {:.2}",
                    step,
                    ltf_ticks.len(),
                    simulator.equity()
                );
            }
        }

        let stats = PerformanceAnalyzer::default().analyze(
            simulator.trades(),
            simulator.equity_curve(),
            settings.initial_balance,
        );

        let mut candles_out = HashMap::new();
        let mut overlays_out = HashMap::new();
        for symbol in &settings.symbols {
            let history = &ltf_histories[symbol];
            overlays_out.insert(symbol.clone(), build_overlays(history));
            candles_out.insert(symbol.clone(), history.candles.clone());
        }

        info!(
            "backtest complete: {} trades, final equity {:.2}",
            stats.total_trades, stats.final_equity
        );

        Ok(BacktestReport {
            symbols: settings.symbols.clone(),
            stats,
            trades: simulator.trades().to_vec(),
            equity: simulator.equity_curve().to_vec(),
            candles: candles_out,
            indicators: overlays_out,
        })
    }
}

/// Null-padded per-symbol chart overlays: Bollinger bands, session VWAP and
/// the sniper limit lines derived from the rolling swing extremes.
fn build_overlays(history: &CandleSeries) -> SymbolOverlays {
    let candles = history.as_slice();
    let (bb_upper, bb_lower) = bollinger_series(candles, 20, rust_decimal::Decimal::TWO);
    let vwap = session_vwap_series(candles);
    let (swing_highs, swing_lows) = rolling_extremes(candles, OVERLAY_SWING_WINDOW);
    let limit_sell = swing_highs
        .iter()
        .map(|v| v.map(|p| p * dec!(1.001)))
        .collect();
    let limit_buy = swing_lows
        .iter()
        .map(|v| v.map(|p| p * dec!(0.999)))
        .collect();

    SymbolOverlays {
        bb_upper,
        bb_lower,
        vwap,
        limit_buy,
        limit_sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, TimeFrame};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    /// Serves a fixed per-symbol tape for the LTF interval and nothing for
    /// any other interval.
    struct InMemoryLoader {
        interval: TimeFrame,
        tapes: HashMap<String, Vec<Candle>>,
    }

    #[async_trait]
    impl MarketDataLoader for InMemoryLoader {
        async fn load_candles(
            &self,
            symbol: &str,
            interval: TimeFrame,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> crate::error::Result<Vec<Candle>> {
            if interval != self.interval {
                return Ok(Vec::new());
            }
            Ok(self
                .tapes
                .get(symbol)
                .map(|tape| {
                    tape.iter()
                        .filter(|c| c.timestamp >= start && c.timestamp <= end)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn candle(i: usize, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle::new(
            t0() + Duration::minutes(15 * i as i64),
            open,
            high,
            low,
            close,
            dec!(100),
        )
    }

    fn settings_for(symbols: Vec<&str>, ticks: usize) -> BacktestSettings {
        BacktestSettings {
            symbols: symbols.into_iter().map(String::from).collect(),
            interval: TimeFrame::M15,
            start: t0(),
            end: Some(t0() + Duration::minutes(15 * ticks as i64)),
            ..BacktestSettings::default()
        }
    }

    fn uptrend_tape(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let close = dec!(100) + dec!(0.1) * Decimal::from(i as u32);
                candle(i, close - dec!(0.05), close + dec!(0.02), close - dec!(0.1), close)
            })
            .collect()
    }

    #[tokio::test]
    async fn monotone_uptrend_produces_no_trades_and_flat_equity() {
        let mut tapes = HashMap::new();
        tapes.insert("BNBUSDT".to_string(), uptrend_tape(200));
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes,
        };
        let engine = BacktestEngine::new(loader, settings_for(vec!["BNBUSDT"], 200)).unwrap();
        let report = engine.run_portfolio().await.unwrap();

        assert_eq!(report.trades.len(), 0);
        assert_eq!(report.stats.total_trades, 0);
        assert_eq!(report.equity.len(), 200);
        assert!(report.equity.iter().all(|p| p.equity == dec!(10000)));
        assert_eq!(report.stats.final_equity, dec!(10000));
        assert_eq!(report.stats.sharpe_ratio, Decimal::ZERO);
        assert_eq!(report.stats.win_rate_pct, Decimal::ZERO);
    }

    #[tokio::test]
    async fn empty_timeline_surfaces_no_data() {
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes: HashMap::new(),
        };
        let engine = BacktestEngine::new(loader, settings_for(vec!["BNBUSDT"], 100)).unwrap();
        let err = engine.run_portfolio().await.unwrap_err();
        assert!(matches!(err, BacktestError::NoData));
    }

    #[tokio::test]
    async fn sweep_and_reclaim_fills_a_sniper_limit() {
        // Flat tape with a swing low at 98 (bar 40), a sweep close at 98.5
        // (bar 50) that arms the limit order, then a dip through the limit
        // price that fills it, and a rally through TP1.
        let mut tape: Vec<Candle> = (0..50)
            .map(|i| candle(i, dec!(100), dec!(100.5), dec!(99.5), dec!(100)))
            .collect();
        tape[40] = candle(40, dec!(100), dec!(100.5), dec!(98), dec!(100));
        tape.push(candle(50, dec!(100), dec!(100.4), dec!(97.5), dec!(98.5)));
        tape.push(candle(51, dec!(98.5), dec!(99), dec!(97.8), dec!(98.9)));
        tape.push(candle(52, dec!(98.9), dec!(101), dec!(98.8), dec!(100.9)));

        let mut tapes = HashMap::new();
        tapes.insert("BNBUSDT".to_string(), tape);
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes,
        };
        let mut settings = settings_for(vec!["BNBUSDT"], 60);
        // Tight sniper stops make risk-based sizing ask for more notional
        // than unleveraged cash allows; the order-value cap keeps the
        // margin check satisfied.
        settings.max_order_value = dec!(1000);
        let engine = BacktestEngine::new(loader, settings).unwrap();
        let report = engine.run_portfolio().await.unwrap();

        // Limit at 98 * 0.999 filled on bar 51; TP1 at ~99.86 banked the
        // first slice on bar 52.
        assert!(!report.trades.is_empty());
        let first = &report.trades[0];
        assert_eq!(first.symbol, "BNBUSDT");
        assert_eq!(first.side, Side::Buy);
        assert_eq!(first.entry_price, dec!(98) * dec!(0.999));
        assert_eq!(first.exit_reason, crate::types::ExitReason::Tp1);
        assert!(first.pnl_usd > Decimal::ZERO);
        assert_eq!(report.equity.len(), 53);
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly_before_the_first_tick() {
        let mut tapes = HashMap::new();
        tapes.insert("BNBUSDT".to_string(), uptrend_tape(100));
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes,
        };
        let engine = BacktestEngine::new(loader, settings_for(vec!["BNBUSDT"], 100)).unwrap();
        engine.cancel_flag().store(true, Ordering::Relaxed);

        let report = engine.run_portfolio().await.unwrap();
        assert!(report.equity.is_empty());
        assert!(report.trades.is_empty());
        assert_eq!(report.stats.final_equity, dec!(10000));
    }

    #[tokio::test]
    async fn multi_symbol_timeline_samples_equity_once_per_tick() {
        let mut tapes = HashMap::new();
        tapes.insert("BNBUSDT".to_string(), uptrend_tape(120));
        // Second symbol missing the first 20 ticks: equity still samples
        // once per timeline tick.
        tapes.insert(
            "SOLUSDT".to_string(),
            uptrend_tape(120).split_off(20),
        );
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes,
        };
        let engine =
            BacktestEngine::new(loader, settings_for(vec!["BNBUSDT", "SOLUSDT"], 120)).unwrap();
        let report = engine.run_portfolio().await.unwrap();

        assert_eq!(report.equity.len(), 120);
        assert!(report
            .equity
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(report.candles["BNBUSDT"].len(), 120);
        assert_eq!(report.candles["SOLUSDT"].len(), 100);

        let overlays = &report.indicators["BNBUSDT"];
        assert_eq!(overlays.bb_upper.len(), 120);
        assert!(overlays.bb_upper[..19].iter().all(|v| v.is_none()));
        assert!(overlays.bb_upper[19].is_some());
        assert!(overlays.limit_buy[25].unwrap() < overlays.limit_sell[25].unwrap());
        assert!(overlays.vwap[0].is_some());
    }

    #[tokio::test]
    async fn invalid_settings_fail_construction() {
        let loader = InMemoryLoader {
            interval: TimeFrame::M15,
            tapes: HashMap::new(),
        };
        let mut settings = settings_for(vec!["BNBUSDT"], 10);
        settings.initial_balance = Decimal::ZERO;
        assert!(BacktestEngine::new(loader, settings).is_err());
    }
}
