#![allow(dead_code)]
use chrono::Utc;
use polars::prelude::{
    DataFrame, NamedFrom, ParquetCompression, ParquetReader, ParquetWriter, SerReader, Series,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{BacktestError, Result};
use crate::types::{Candle, TimeFrame};

const METADATA_FILE: &str = "metadata.json";

/// Per-file sync bookkeeping, keyed by `SYMBOL_interval` in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub last_sync: String,
    pub candle_count: usize,
    pub date_range: String,
}

/// Columnar candle cache: one ZSTD-compressed parquet file per
/// (symbol, interval) under the cache root.
///
/// ```text
/// <cache_root>/
///   BTCUSDT/
///     15m.parquet
///   metadata.json
/// ```
#[derive(Debug)]
pub struct CandleCache {
    root: PathBuf,
    metadata: BTreeMap<String, CacheEntryMeta>,
}

impl CandleCache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let metadata = load_metadata(&root.join(METADATA_FILE));
        Ok(Self { root, metadata })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, symbol: &str, interval: TimeFrame) -> PathBuf {
        self.root
            .join(symbol.to_uppercase())
            .join(format!("{}.parquet", interval.as_str()))
    }

    fn metadata_key(symbol: &str, interval: TimeFrame) -> String {
        format!("{}_{}", symbol.to_uppercase(), interval.as_str())
    }

    /// Read the cached series, ascending by timestamp. A missing file yields
    /// `None`; an unreadable one is logged, ignored and also yields `None`
    /// so the caller refetches.
    pub fn read(&self, symbol: &str, interval: TimeFrame) -> Option<Vec<Candle>> {
        let path = self.path_for(symbol, interval);
        if !path.exists() {
            return None;
        }
        match read_parquet(&path) {
            Ok(candles) => {
                debug!(
                    "cache hit: {} candles from {}",
                    candles.len(),
                    path.display()
                );
                Some(candles)
            }
            Err(e) => {
                warn!("cache file {} unreadable ({}), refetching", path.display(), e);
                None
            }
        }
    }

    /// Persist a full series (sorted, deduplicated by the caller) and
    /// update the metadata document.
    pub fn write(&mut self, symbol: &str, interval: TimeFrame, candles: &[Candle]) -> Result<()> {
        let path = self.path_for(symbol, interval);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_parquet(&path, candles)?;

        let date_range = match (candles.first(), candles.last()) {
            (Some(first), Some(last)) => format!("{} - {}", first.timestamp, last.timestamp),
            _ => String::new(),
        };
        self.metadata.insert(
            Self::metadata_key(symbol, interval),
            CacheEntryMeta {
                last_sync: Utc::now().to_rfc3339(),
                candle_count: candles.len(),
                date_range,
            },
        );
        self.save_metadata()?;
        debug!("cached {} candles at {}", candles.len(), path.display());
        Ok(())
    }

    pub fn clear(&mut self, symbol: Option<&str>, interval: Option<TimeFrame>) -> Result<()> {
        match (symbol, interval) {
            (Some(sym), Some(itv)) => {
                let path = self.path_for(sym, itv);
                if path.exists() {
                    fs::remove_file(&path)?;
                }
                self.metadata.remove(&Self::metadata_key(sym, itv));
                info!("cleared cache for {} {}", sym, itv);
            }
            (Some(sym), None) => {
                let dir = self.root.join(sym.to_uppercase());
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                let prefix = format!("{}_", sym.to_uppercase());
                self.metadata.retain(|k, _| !k.starts_with(&prefix));
                info!("cleared cache for {}", sym);
            }
            _ => {
                for entry in fs::read_dir(&self.root)? {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        fs::remove_dir_all(entry.path())?;
                    }
                }
                self.metadata.clear();
                info!("cleared entire candle cache");
            }
        }
        self.save_metadata()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            cache_dir: self.root.display().to_string(),
            total_size_kb: 0.0,
            files: BTreeMap::new(),
        };
        let Ok(entries) = fs::read_dir(&self.root) else {
            return stats;
        };
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let symbol = entry.file_name().to_string_lossy().to_string();
            let Ok(files) = fs::read_dir(entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                let name = file.file_name().to_string_lossy().to_string();
                let Some(interval) = name.strip_suffix(".parquet") else {
                    continue;
                };
                let size_kb = file.metadata().map(|m| m.len() as f64 / 1024.0).unwrap_or(0.0);
                stats.total_size_kb += size_kb;
                stats.files.insert(
                    format!("{}_{}", symbol, interval),
                    CacheFileStats {
                        size_kb,
                        meta: self.metadata.get(&format!("{}_{}", symbol, interval)).cloned(),
                    },
                );
            }
        }
        stats
    }

    fn save_metadata(&self) -> Result<()> {
        let path = self.root.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&self.metadata)
            .map_err(|e| BacktestError::CacheIo(io::Error::new(io::ErrorKind::Other, e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheFileStats {
    pub size_kb: f64,
    pub meta: Option<CacheEntryMeta>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cache_dir: String,
    pub total_size_kb: f64,
    pub files: BTreeMap<String, CacheFileStats>,
}

fn load_metadata(path: &Path) -> BTreeMap<String, CacheEntryMeta> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match fs::read_to_string(path).map_err(anyhow::Error::from).and_then(|raw| {
        serde_json::from_str::<BTreeMap<String, CacheEntryMeta>>(&raw).map_err(Into::into)
    }) {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("cache metadata unreadable ({}), starting fresh", e);
            BTreeMap::new()
        }
    }
}

fn polars_io_error(e: polars::prelude::PolarsError) -> BacktestError {
    BacktestError::CacheIo(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

fn write_parquet(path: &Path, candles: &[Candle]) -> Result<()> {
    let to_f64 = |d: Decimal| d.to_f64().unwrap_or(0.0);
    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp.timestamp_millis()).collect();
    let opens: Vec<f64> = candles.iter().map(|c| to_f64(c.open)).collect();
    let highs: Vec<f64> = candles.iter().map(|c| to_f64(c.high)).collect();
    let lows: Vec<f64> = candles.iter().map(|c| to_f64(c.low)).collect();
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| to_f64(c.volume)).collect();

    let mut df = DataFrame::new(vec![
        Series::new("timestamp", timestamps),
        Series::new("open", opens),
        Series::new("high", highs),
        Series::new("low", lows),
        Series::new("close", closes),
        Series::new("volume", volumes),
    ])
    .map_err(polars_io_error)?;

    let file = File::create(path)?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut df)
        .map_err(polars_io_error)?;
    Ok(())
}

fn read_parquet(path: &Path) -> anyhow::Result<Vec<Candle>> {
    let file = File::open(path)?;
    let df = ParquetReader::new(file).finish()?;

    let timestamps = df.column("timestamp")?.i64()?;
    let opens = df.column("open")?.f64()?;
    let highs = df.column("high")?.f64()?;
    let lows = df.column("low")?.f64()?;
    let closes = df.column("close")?.f64()?;
    let volumes = df.column("volume")?.f64()?;

    let from_f64 = |v: Option<f64>| -> Option<Decimal> { Decimal::from_f64_retain(v?) };

    let mut candles = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let row = (|| {
            Some(Candle::new(
                chrono::TimeZone::timestamp_millis_opt(&Utc, timestamps.get(i)?).single()?,
                from_f64(opens.get(i))?,
                from_f64(highs.get(i))?,
                from_f64(lows.get(i))?,
                from_f64(closes.get(i))?,
                from_f64(volumes.get(i))?,
            ))
        })();
        match row {
            Some(candle) => candles.push(candle),
            None => anyhow::bail!("null cell in cached row {}", i),
        }
    }
    candles.sort_by_key(|c| c.timestamp);
    candles.dedup_by_key(|c| c.timestamp);
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(i: i64) -> Candle {
        let price = Decimal::from(100 + i);
        Candle::new(
            Utc.timestamp_opt(i * 900, 0).unwrap(),
            price,
            price + dec!(1),
            price - dec!(1),
            price,
            dec!(10),
        )
    }

    #[test]
    fn parquet_round_trip_preserves_series() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CandleCache::open(dir.path()).unwrap();
        let candles: Vec<Candle> = (0..50).map(candle).collect();

        cache.write("BNBUSDT", TimeFrame::M15, &candles).unwrap();
        let loaded = cache.read("BNBUSDT", TimeFrame::M15).unwrap();

        assert_eq!(loaded.len(), 50);
        assert_eq!(loaded[0].timestamp, candles[0].timestamp);
        assert_eq!(loaded[49].close, candles[49].close);
        assert_eq!(loaded[10].volume, dec!(10));
    }

    #[test]
    fn metadata_written_alongside() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CandleCache::open(dir.path()).unwrap();
        cache
            .write("BNBUSDT", TimeFrame::M15, &[candle(0), candle(1)])
            .unwrap();

        let raw = fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap();
        let parsed: BTreeMap<String, CacheEntryMeta> = serde_json::from_str(&raw).unwrap();
        let entry = parsed.get("BNBUSDT_15m").unwrap();
        assert_eq!(entry.candle_count, 2);
        assert!(!entry.date_range.is_empty());
    }

    #[test]
    fn corrupted_file_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::open(dir.path()).unwrap();
        let path = cache.path_for("BNBUSDT", TimeFrame::M15);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"definitely not parquet").unwrap();

        assert!(cache.read("BNBUSDT", TimeFrame::M15).is_none());
    }

    #[test]
    fn clear_by_symbol_removes_files_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CandleCache::open(dir.path()).unwrap();
        cache.write("BNBUSDT", TimeFrame::M15, &[candle(0)]).unwrap();
        cache.write("SOLUSDT", TimeFrame::M15, &[candle(0)]).unwrap();

        cache.clear(Some("BNBUSDT"), None).unwrap();
        assert!(cache.read("BNBUSDT", TimeFrame::M15).is_none());
        assert!(cache.read("SOLUSDT", TimeFrame::M15).is_some());
        assert!(!cache.stats().files.contains_key("BNBUSDT_15m"));
    }
}
