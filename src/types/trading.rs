#![allow(dead_code)]
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl TimeFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFrame::M1 => "1m",
            TimeFrame::M3 => "3m",
            TimeFrame::M5 => "5m",
            TimeFrame::M15 => "15m",
            TimeFrame::M30 => "30m",
            TimeFrame::H1 => "1h",
            TimeFrame::H2 => "2h",
            TimeFrame::H4 => "4h",
            TimeFrame::H6 => "6h",
            TimeFrame::H8 => "8h",
            TimeFrame::H12 => "12h",
            TimeFrame::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TimeFrame::M1),
            "3m" => Some(TimeFrame::M3),
            "5m" => Some(TimeFrame::M5),
            "15m" => Some(TimeFrame::M15),
            "30m" => Some(TimeFrame::M30),
            "1h" => Some(TimeFrame::H1),
            "2h" => Some(TimeFrame::H2),
            "4h" => Some(TimeFrame::H4),
            "6h" => Some(TimeFrame::H6),
            "8h" => Some(TimeFrame::H8),
            "12h" => Some(TimeFrame::H12),
            "1d" => Some(TimeFrame::D1),
            _ => None,
        }
    }

    pub fn to_minutes(&self) -> u64 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M3 => 3,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::M30 => 30,
            TimeFrame::H1 => 60,
            TimeFrame::H2 => 120,
            TimeFrame::H4 => 240,
            TimeFrame::H6 => 360,
            TimeFrame::H8 => 480,
            TimeFrame::H12 => 720,
            TimeFrame::D1 => 1440,
        }
    }

    pub fn to_milliseconds(&self) -> i64 {
        self.to_minutes() as i64 * 60 * 1000
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.to_minutes() as i64)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Higher-timeframe trend classification produced by the EMA-200 filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendBias {
    #[serde(rename = "BULLISH")]
    Bullish,
    #[serde(rename = "BEARISH")]
    Bearish,
    #[serde(rename = "NEUTRAL")]
    Neutral,
}

impl TrendBias {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendBias::Bullish => "BULLISH",
            TrendBias::Bearish => "BEARISH",
            TrendBias::Neutral => "NEUTRAL",
        }
    }
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_roundtrip() {
        for tf in [
            TimeFrame::M1,
            TimeFrame::M15,
            TimeFrame::H1,
            TimeFrame::H4,
            TimeFrame::D1,
        ] {
            assert_eq!(TimeFrame::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(TimeFrame::parse("7m"), None);
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
