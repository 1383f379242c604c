#![allow(dead_code)]
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::error::{BacktestError, Result};
use crate::types::{Candle, TimeFrame};

const BINANCE_API: &str = "https://api.binance.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One page of klines from an upstream market-data endpoint.
///
/// The warehouse drives pagination through this seam; tests inject
/// recording fixtures instead of the live client.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Fetch up to `limit` candles ending at `end_time_ms` (inclusive,
    /// milliseconds since epoch). `limit` is clamped to 1000 upstream.
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: TimeFrame,
        limit: u32,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>>;
}

/// Public-endpoint Binance REST client. No API keys: the backtester only
/// ever reads market data.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_API)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

impl Default for BinanceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KlineSource for BinanceClient {
    async fn fetch_klines(
        &self,
        symbol: &str,
        interval: TimeFrame,
        limit: u32,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.min(1000);
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            interval.as_str(),
            limit
        );
        if let Some(end) = end_time_ms {
            url.push_str(&format!("&endTime={}", end));
        }

        debug!("GET {}", url);

        let rows: Vec<Vec<serde_json::Value>> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BacktestError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| BacktestError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| BacktestError::Upstream(e.to_string()))?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            candles.push(
                parse_kline(&row).map_err(|e| BacktestError::Upstream(e.to_string()))?,
            );
        }
        Ok(candles)
    }
}

/// Parse one Binance kline row:
/// `[open_time_ms, open, high, low, close, volume, close_time_ms, ...]`.
/// Prices come as decimal strings; the open time is interpreted as UTC.
fn parse_kline(row: &[serde_json::Value]) -> anyhow::Result<Candle> {
    let open_time = row
        .first()
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow!("kline row missing open time"))?;

    let field = |idx: usize| -> anyhow::Result<Decimal> {
        let raw = row
            .get(idx)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("kline row missing field {}", idx))?;
        Ok(Decimal::from_str(raw)?)
    };

    let timestamp = Utc
        .timestamp_millis_opt(open_time)
        .single()
        .ok_or_else(|| anyhow!("kline open time {} out of range", open_time))?;

    Ok(Candle::new(
        timestamp,
        field(1)?,
        field(2)?,
        field(3)?,
        field(4)?,
        field(5)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn parses_kline_row() {
        let row = vec![
            json!(1700000000000i64),
            json!("245.10"),
            json!("246.00"),
            json!("244.50"),
            json!("245.80"),
            json!("1234.5"),
            json!(1700000899999i64),
            json!("302000.0"),
            json!(100),
        ];
        let candle = parse_kline(&row).unwrap();
        assert_eq!(candle.open, dec!(245.10));
        assert_eq!(candle.high, dec!(246.00));
        assert_eq!(candle.low, dec!(244.50));
        assert_eq!(candle.close, dec!(245.80));
        assert_eq!(candle.volume, dec!(1234.5));
        assert_eq!(candle.timestamp.timestamp_millis(), 1700000000000);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn rejects_malformed_row() {
        let row = vec![json!("not-a-timestamp")];
        assert!(parse_kline(&row).is_err());
    }
}
