mod config;
mod data;
mod engine;
mod error;
mod exchange;
mod indicators;
mod risk;
mod strategies;
mod types;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::BacktestSettings;
use data::HistoricalDataLoader;
use engine::BacktestEngine;
use error::BacktestError;
use exchange::BinanceClient;
use types::TimeFrame;

#[derive(Parser)]
#[command(name = "crypto-backtester")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic multi-symbol crypto backtester", long_about = None)]
struct Cli {
    /// Candle cache directory
    #[arg(long, default_value = "data/cache")]
    cache_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical candles through the strategy and simulator
    Backtest {
        /// Comma-separated symbols, e.g. BNBUSDT,SOLUSDT
        #[arg(short, long, default_value = "BNBUSDT")]
        symbols: String,

        /// Candle interval (1m, 5m, 15m, 1h, 4h, 1d, ...)
        #[arg(short, long, default_value = "15m")]
        interval: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD); defaults to now
        #[arg(long)]
        end: Option<String>,

        /// Initial balance in USDT
        #[arg(long, default_value = "10000")]
        capital: f64,

        /// Fraction of balance risked per trade
        #[arg(long, default_value = "0.01")]
        risk_per_trade: f64,

        /// Account leverage (1 = spot-like)
        #[arg(long, default_value = "1")]
        leverage: f64,

        /// Maximum simultaneous positions
        #[arg(long, default_value = "3")]
        max_positions: usize,

        /// Notional cap per order; 0 disables the cap
        #[arg(long, default_value = "0")]
        max_order_value: f64,

        /// Maintenance margin rate for the liquidation formula
        #[arg(long, default_value = "0.004")]
        maintenance_margin_rate: f64,

        /// Taker fee charged on fills and closes
        #[arg(long, default_value = "0")]
        fee_rate: f64,

        /// Disable the circuit breaker
        #[arg(long)]
        no_circuit_breaker: bool,

        /// Consecutive losses before a (symbol, side) cooldown
        #[arg(long, default_value = "3")]
        cb_losses: u32,

        /// Cooldown hours after a loss streak
        #[arg(long, default_value = "4")]
        cb_cooldown_hours: i64,

        /// Daily drawdown fraction that halts all trading
        #[arg(long, default_value = "0.10")]
        cb_drawdown: f64,

        /// Write the full JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Load settings from a TOML file instead of the flags above
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Inspect or clear the candle cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show per-file cache sizes and sync metadata
    Stats,
    /// Delete cached candles
    Clear {
        /// Restrict to one symbol
        #[arg(short, long)]
        symbol: Option<String>,

        /// Restrict to one interval (requires --symbol)
        #[arg(short, long)]
        interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Backtest {
            symbols,
            interval,
            start,
            end,
            capital,
            risk_per_trade,
            leverage,
            max_positions,
            max_order_value,
            maintenance_margin_rate,
            fee_rate,
            no_circuit_breaker,
            cb_losses,
            cb_cooldown_hours,
            cb_drawdown,
            output,
            config,
        } => {
            let settings = match config {
                Some(path) => {
                    info!("loading settings from {}", path.display());
                    BacktestSettings::from_toml_file(&path)?
                }
                None => BacktestSettings {
                    symbols: symbols
                        .split(',')
                        .map(|s| s.trim().to_uppercase())
                        .filter(|s| !s.is_empty())
                        .collect(),
                    interval: parse_interval(&interval)?,
                    start: parse_date(&start, false)?,
                    end: end.as_deref().map(|e| parse_date(e, true)).transpose()?,
                    initial_balance: Decimal::try_from(capital)?,
                    risk_per_trade: Decimal::try_from(risk_per_trade)?,
                    leverage: Decimal::try_from(leverage)?,
                    max_positions,
                    max_order_value: Decimal::try_from(max_order_value)?,
                    maintenance_margin_rate: Decimal::try_from(maintenance_margin_rate)?,
                    fee_rate: Decimal::try_from(fee_rate)?,
                    enable_circuit_breaker: !no_circuit_breaker,
                    cb_max_consecutive_losses: cb_losses,
                    cb_cooldown_hours,
                    cb_drawdown_limit: Decimal::try_from(cb_drawdown)?,
                    ..BacktestSettings::default()
                },
            };
            run_backtest(settings, cli.cache_dir, output).await?;
        }
        Commands::Cache { action } => {
            let loader = HistoricalDataLoader::new(BinanceClient::new(), cli.cache_dir)?;
            match action {
                CacheCommands::Stats => {
                    let stats = loader.cache_stats().await;
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
                CacheCommands::Clear { symbol, interval } => {
                    if interval.is_some() && symbol.is_none() {
                        return Err(anyhow!("--interval requires --symbol"));
                    }
                    let interval = interval.as_deref().map(parse_interval).transpose()?;
                    loader.clear_cache(symbol.as_deref(), interval).await?;
                    println!("cache cleared");
                }
            }
        }
    }

    Ok(())
}

async fn run_backtest(
    settings: BacktestSettings,
    cache_dir: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    info!(
        "backtest: {} [{}] {} -> {}",
        settings.symbols.join(","),
        settings.interval,
        settings.start.date_naive(),
        settings
            .end
            .map(|e| e.date_naive().to_string())
            .unwrap_or_else(|| "now".to_string())
    );

    let loader = HistoricalDataLoader::new(BinanceClient::new(), cache_dir)?;
    let engine = BacktestEngine::new(loader, settings)?;

    // Ctrl-C flips the cooperative flag; the engine finishes its current
    // tick and reports on the partial timeline.
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current tick");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let report = match engine.run_portfolio().await {
        Ok(report) => report,
        Err(BacktestError::NoData) => {
            // Contractual error surface for an empty timeline.
            println!("{}", serde_json::json!({ "error": "No data" }));
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    report.stats.print_summary();

    if let Some(path) = output {
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}

fn parse_interval(raw: &str) -> Result<TimeFrame> {
    TimeFrame::parse(raw).ok_or_else(|| anyhow!("unknown interval {:?}", raw))
}

/// Parse `YYYY-MM-DD`; end dates extend to the last second of the day.
fn parse_date(raw: &str, end_of_day: bool) -> Result<chrono::DateTime<Utc>> {
    let date: NaiveDate = raw
        .parse()
        .map_err(|_| anyhow!("invalid date {:?}, expected YYYY-MM-DD", raw))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59).expect("valid constant time")
    } else {
        NaiveTime::from_hms_opt(0, 0, 0).expect("valid constant time")
    };
    Ok(date.and_time(time).and_utc())
}
