#![allow(dead_code)]
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::TimeFrame;

/// Immutable OHLCV record. Created by the data warehouse, never mutated.
/// Equality and ordering are by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check the OHLCV shape invariants:
    /// `low <= min(open, close) <= max(open, close) <= high`, `volume >= 0`.
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.volume >= Decimal::ZERO
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> Decimal {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> Decimal {
        self.close.min(self.open) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// True when `price` lies inside this candle's traded range.
    pub fn contains(&self, price: Decimal) -> bool {
        self.low <= price && price <= self.high
    }
}

impl PartialEq for Candle {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Candle {}

impl PartialOrd for Candle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

/// Ordered candle sequence with strictly increasing, unique timestamps.
/// Duplicates are dropped on ingest.
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self {
            candles: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            candles: Vec::with_capacity(capacity),
        }
    }

    /// Build from an arbitrary collection: sorts ascending and drops
    /// duplicate timestamps, keeping the first occurrence.
    pub fn from_candles(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Self { candles }
    }

    /// Append a candle. Candles at or before the current tail are ignored,
    /// which keeps timestamps strictly increasing.
    pub fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.last() {
            if candle.timestamp <= last.timestamp {
                return false;
            }
        }
        self.candles.push(candle);
        true
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last_n(&self, n: usize) -> &[Candle] {
        let len = self.candles.len();
        if n >= len {
            &self.candles[..]
        } else {
            &self.candles[len - n..]
        }
    }

    /// Inclusive slice of the series covering `[start, end]`.
    pub fn slice_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect()
    }

    /// True when consecutive timestamps are spaced exactly one `interval`.
    pub fn has_uniform_interval(&self, interval: TimeFrame) -> bool {
        let step = interval.duration();
        self.candles
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == step)
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn highs(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.high).collect()
    }

    pub fn lows(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.low).collect()
    }

    pub fn volumes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    pub fn typical_prices(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.typical_price()).collect()
    }
}
