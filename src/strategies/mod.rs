#![allow(dead_code)]
pub mod confluence;
pub mod pullback;
pub mod registry;
pub mod sniper;
pub mod trend_filter;

pub use confluence::*;
pub use pullback::*;
pub use registry::*;
pub use sniper::*;
pub use trend_filter::*;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::{
    atr, bollinger, detect_sfp, find_recent_swing_high, find_recent_swing_low, session_vwap,
    stoch_rsi_default, BollingerResult, SfpParams, SfpResult, StochRsiResult, SwingPoint,
    VwapResult, DEFAULT_ATR_PERIOD, DEFAULT_BB_PERIOD, DEFAULT_SWING_LOOKBACK,
};
use crate::types::{Candle, TrendBias};

/// Strategy families the registry can name. The engine currently wires the
/// liquidity sniper; `TrendPullback` is the dispatcher's extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "sfp_mean_reversion")]
    LiquiditySniper,
    #[serde(rename = "trend_pullback")]
    TrendPullback,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::LiquiditySniper => "sfp_mean_reversion",
            StrategyKind::TrendPullback => "trend_pullback",
        }
    }
}

/// Per-tick, per-symbol view over the rolling window: the indicator bundle
/// every strategy consumes. Rebuilt each tick, never stored.
#[derive(Debug)]
pub struct MarketContext<'a> {
    pub candles: &'a [Candle],
    pub current: &'a Candle,
    pub price: Decimal,
    pub vwap: Option<VwapResult>,
    pub bollinger: Option<BollingerResult>,
    pub stoch_rsi: Option<StochRsiResult>,
    pub atr: Decimal,
    pub sfp: Option<SfpResult>,
    /// Most recent confirmed pivot swings, if any exist in the window.
    pub swing_high: Option<SwingPoint>,
    pub swing_low: Option<SwingPoint>,
    pub htf_bias: TrendBias,
}

/// Max age (in bars) of the pivot swings attached to the context.
const CONTEXT_SWING_MAX_AGE: usize = 20;

impl<'a> MarketContext<'a> {
    pub fn prepare(candles: &'a [Candle], htf_bias: TrendBias) -> Option<Self> {
        let current = candles.last()?;
        Some(Self {
            candles,
            current,
            price: current.close,
            vwap: session_vwap(candles),
            bollinger: bollinger(candles, DEFAULT_BB_PERIOD, Decimal::TWO),
            stoch_rsi: stoch_rsi_default(candles),
            atr: atr(candles, DEFAULT_ATR_PERIOD),
            sfp: detect_sfp(candles, &SfpParams::default()),
            swing_high: find_recent_swing_high(
                candles,
                DEFAULT_SWING_LOOKBACK,
                CONTEXT_SWING_MAX_AGE,
            ),
            swing_low: find_recent_swing_low(
                candles,
                DEFAULT_SWING_LOOKBACK,
                CONTEXT_SWING_MAX_AGE,
            ),
            htf_bias,
        })
    }
}
