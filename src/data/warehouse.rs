use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BacktestError, Result};
use crate::exchange::KlineSource;
use crate::types::{Candle, TimeFrame};

use super::cache::{CacheStats, CandleCache};

/// Timestamp-keyed portfolio timeline. Timestamps missing a symbol are
/// simply absent from that inner map; `BTreeMap` keeps ticks ascending.
pub type PortfolioTimeline = BTreeMap<DateTime<Utc>, HashMap<String, Candle>>;

const PAGE_LIMIT: u32 = 1000;
const MAX_PAGES_PER_FETCH: usize = 100;
const PAGE_DELAY: Duration = Duration::from_millis(50);

/// Source of historical candles for the engine. The warehouse is the
/// production implementation; tests inject in-memory fixtures.
#[async_trait]
pub trait MarketDataLoader: Send + Sync {
    /// Candles for `[start, end]` inclusive, strictly increasing and
    /// deduplicated by timestamp.
    async fn load_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Load every symbol concurrently and merge into one timeline.
    async fn load_portfolio_data(
        &self,
        symbols: &[String],
        interval: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PortfolioTimeline> {
        let loads = symbols
            .iter()
            .map(|symbol| self.load_candles(symbol, interval, start, end));
        let results = future::join_all(loads).await;

        let mut timeline = PortfolioTimeline::new();
        for (symbol, outcome) in symbols.iter().zip(results) {
            for candle in outcome? {
                timeline
                    .entry(candle.timestamp)
                    .or_default()
                    .insert(symbol.clone(), candle);
            }
        }
        info!(
            "portfolio timeline ready: {} timestamps across {} symbols",
            timeline.len(),
            symbols.len()
        );
        Ok(timeline)
    }
}

/// Smart local data warehouse.
///
/// Candles live in per-(symbol, interval) parquet files; each load only
/// fetches the slices missing from the cache (before and/or after the
/// cached range), merges, persists, and serves the requested window.
pub struct HistoricalDataLoader<S> {
    source: S,
    cache: Mutex<CandleCache>,
    page_delay: Duration,
}

impl<S: KlineSource> HistoricalDataLoader<S> {
    pub fn new(source: S, cache_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            source,
            cache: Mutex::new(CandleCache::open(cache_root)?),
            page_delay: PAGE_DELAY,
        })
    }

    /// Disable the inter-page pacing delay. Test fixtures only.
    #[cfg(test)]
    pub fn without_pacing(mut self) -> Self {
        self.page_delay = Duration::ZERO;
        self
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    pub async fn clear_cache(
        &self,
        symbol: Option<&str>,
        interval: Option<TimeFrame>,
    ) -> Result<()> {
        self.cache.lock().await.clear(symbol, interval)
    }

    /// Backwards-paginated fetch of `[start, end]` from the upstream source.
    ///
    /// Pages run from the upper bound toward `start`, at most
    /// `MAX_PAGES_PER_FETCH` of them. A transient upstream failure or an
    /// empty page stops pagination; whatever was collected is returned.
    async fn fetch_range(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Candle> {
        let start_ms = start.timestamp_millis();
        let mut current_end_ms = end.timestamp_millis();
        let mut pages = 0;
        let mut collected: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();

        while current_end_ms >= start_ms && pages < MAX_PAGES_PER_FETCH {
            let page = match self
                .source
                .fetch_klines(symbol, interval, PAGE_LIMIT, Some(current_end_ms))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("{} {}: upstream page failed ({}), keeping partial data", symbol, interval, e);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let first_ts = page[0].timestamp;
            for candle in page {
                if candle.timestamp < start || candle.timestamp > end {
                    continue;
                }
                if !candle.is_well_formed() {
                    warn!(
                        "{} {}: dropping malformed candle at {}",
                        symbol, interval, candle.timestamp
                    );
                    continue;
                }
                collected.insert(candle.timestamp, candle);
            }

            if first_ts.timestamp_millis() <= start_ms {
                break;
            }
            current_end_ms = first_ts.timestamp_millis() - 1;
            pages += 1;

            if !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        collected.into_values().collect()
    }
}

#[async_trait]
impl<S: KlineSource> MarketDataLoader for HistoricalDataLoader<S> {
    async fn load_candles(
        &self,
        symbol: &str,
        interval: TimeFrame,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if end < start {
            return Err(BacktestError::InputValidation(format!(
                "end {} precedes start {}",
                end, start
            )));
        }

        info!(
            "smart sync: {} {} | {} -> {}",
            symbol,
            interval,
            start.date_naive(),
            end.date_naive()
        );

        let cached = { self.cache.lock().await.read(symbol, interval) };
        let mut merged: BTreeMap<DateTime<Utc>, Candle> = cached
            .unwrap_or_default()
            .into_iter()
            .map(|c| (c.timestamp, c))
            .collect();

        let step = interval.duration();
        let mut fetched = 0usize;

        if merged.is_empty() {
            debug!("{} {}: cache miss, fetching full range", symbol, interval);
            for candle in self.fetch_range(symbol, interval, start, end).await {
                merged.insert(candle.timestamp, candle);
                fetched += 1;
            }
        } else {
            let cache_min = *merged.keys().next().expect("non-empty");
            let cache_max = *merged.keys().next_back().expect("non-empty");

            if start < cache_min {
                let upper = cache_min - step;
                debug!(
                    "{} {}: backfilling {} -> {}",
                    symbol, interval, start, upper
                );
                for candle in self.fetch_range(symbol, interval, start, upper).await {
                    merged.insert(candle.timestamp, candle);
                    fetched += 1;
                }
            }
            if end > cache_max + step {
                let lower = cache_max + step;
                debug!(
                    "{} {}: incremental update {} -> {}",
                    symbol, interval, lower, end
                );
                for candle in self.fetch_range(symbol, interval, lower, end).await {
                    merged.insert(candle.timestamp, candle);
                    fetched += 1;
                }
            }
        }

        if fetched > 0 {
            let full: Vec<Candle> = merged.values().cloned().collect();
            self.cache.lock().await.write(symbol, interval, &full)?;
        }

        let slice: Vec<Candle> = merged
            .range(start..=end)
            .map(|(_, c)| c.clone())
            .collect();
        info!(
            "{} {}: returning {} candles ({} freshly fetched)",
            symbol,
            interval,
            slice.len(),
            fetched
        );
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn candle_at(ts: DateTime<Utc>) -> Candle {
        let price = dec!(100);
        Candle::new(ts, price, price + dec!(1), price - dec!(1), price, dec!(5))
    }

    fn minutes(m: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(m * 60, 0).unwrap()
    }

    /// Fixture source backed by a fixed 15m tape; serves the last `limit`
    /// candles at or before `end_time_ms`, mirroring the upstream contract.
    struct FixtureSource {
        tape: Vec<Candle>,
        calls: Arc<AtomicUsize>,
    }

    impl FixtureSource {
        fn new(from_min: i64, to_min: i64) -> Self {
            let tape = (from_min..=to_min)
                .step_by(15)
                .map(|m| candle_at(minutes(m)))
                .collect();
            Self {
                tape,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl KlineSource for FixtureSource {
        async fn fetch_klines(
            &self,
            _symbol: &str,
            _interval: TimeFrame,
            limit: u32,
            end_time_ms: Option<i64>,
        ) -> Result<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let end = end_time_ms.unwrap_or(i64::MAX);
            let eligible: Vec<Candle> = self
                .tape
                .iter()
                .filter(|c| c.timestamp.timestamp_millis() <= end)
                .cloned()
                .collect();
            let keep = eligible.len().saturating_sub(limit as usize);
            Ok(eligible[keep..].to_vec())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl KlineSource for FailingSource {
        async fn fetch_klines(
            &self,
            _symbol: &str,
            _interval: TimeFrame,
            _limit: u32,
            _end_time_ms: Option<i64>,
        ) -> Result<Vec<Candle>> {
            Err(BacktestError::Upstream("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn incremental_sync_fetches_only_the_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(0, 6000);
        let calls = source.calls.clone();
        let loader = HistoricalDataLoader::new(source, dir.path())
            .unwrap()
            .without_pacing();

        // Seed the cache with the middle of the tape.
        loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(1500), minutes(3000))
            .await
            .unwrap();
        let seed_calls = calls.load(Ordering::SeqCst);
        assert!(seed_calls >= 1);

        // Wider request: one backfill fetch and one incremental fetch.
        let candles = loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(4500))
            .await
            .unwrap();
        let gap_calls = calls.load(Ordering::SeqCst) - seed_calls;
        assert_eq!(gap_calls, 2);

        // Full coverage, sorted, duplicate-free.
        assert_eq!(candles.len(), 301);
        assert!(candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(candles[0].timestamp, minutes(0));
        assert_eq!(candles.last().unwrap().timestamp, minutes(4500));
    }

    #[tokio::test]
    async fn covered_reload_makes_zero_network_calls() {
        let dir = tempfile::tempdir().unwrap();
        let source = FixtureSource::new(0, 3000);
        let calls = source.calls.clone();
        let loader = HistoricalDataLoader::new(source, dir.path())
            .unwrap()
            .without_pacing();

        let first = loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(3000))
            .await
            .unwrap();
        let after_first = calls.load(Ordering::SeqCst);

        let second = loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(3000))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), after_first);
        assert_eq!(first.len(), second.len());
        assert_eq!(first.first().unwrap().timestamp, second.first().unwrap().timestamp);
        assert_eq!(first.last().unwrap().timestamp, second.last().unwrap().timestamp);
    }

    #[tokio::test]
    async fn split_load_equals_full_load() {
        let dir_full = tempfile::tempdir().unwrap();
        let dir_split = tempfile::tempdir().unwrap();

        let full_loader = HistoricalDataLoader::new(FixtureSource::new(0, 3000), dir_full.path())
            .unwrap()
            .without_pacing();
        let split_loader = HistoricalDataLoader::new(FixtureSource::new(0, 3000), dir_split.path())
            .unwrap()
            .without_pacing();

        let full = full_loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(3000))
            .await
            .unwrap();

        let mut stitched = split_loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(1500))
            .await
            .unwrap();
        stitched.extend(
            split_loader
                .load_candles("BNBUSDT", TimeFrame::M15, minutes(1515), minutes(3000))
                .await
                .unwrap(),
        );

        assert_eq!(full.len(), stitched.len());
        assert!(full
            .iter()
            .zip(&stitched)
            .all(|(a, b)| a.timestamp == b.timestamp));
    }

    #[tokio::test]
    async fn upstream_failure_returns_empty_series() {
        let dir = tempfile::tempdir().unwrap();
        let loader = HistoricalDataLoader::new(FailingSource, dir.path())
            .unwrap()
            .without_pacing();

        let candles = loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(0), minutes(3000))
            .await
            .unwrap();
        assert!(candles.is_empty());
    }

    #[tokio::test]
    async fn portfolio_timeline_merges_symbols_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let loader = HistoricalDataLoader::new(FixtureSource::new(0, 1500), dir.path())
            .unwrap()
            .without_pacing();

        let symbols = vec!["BNBUSDT".to_string(), "SOLUSDT".to_string()];
        let timeline = loader
            .load_portfolio_data(&symbols, TimeFrame::M15, minutes(0), minutes(1500))
            .await
            .unwrap();

        assert_eq!(timeline.len(), 101);
        let first = timeline.values().next().unwrap();
        assert!(first.contains_key("BNBUSDT"));
        assert!(first.contains_key("SOLUSDT"));
        let keys: Vec<_> = timeline.keys().collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let loader = HistoricalDataLoader::new(FixtureSource::new(0, 1500), dir.path())
            .unwrap()
            .without_pacing();

        let err = loader
            .load_candles("BNBUSDT", TimeFrame::M15, minutes(1500), minutes(0))
            .await
            .unwrap_err();
        assert!(matches!(err, BacktestError::InputValidation(_)));
    }
}
