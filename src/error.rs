use thiserror::Error;

/// Error kinds surfaced by the backtest core.
///
/// Predictable, data-shaped failures (upstream hiccups, cache corruption)
/// are recovered where they occur and never reach this enum; what remains
/// is either a caller mistake or a fatal inconsistency.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// Malformed request parameters, rejected before any fetch.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// The loader produced an empty timeline for the requested range.
    #[error("no market data available for the requested range")]
    NoData,

    /// Upstream market-data request failed.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// Strategy registry or filter parameter out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The simulator reached a state inconsistent with its invariants.
    /// Always a programming error; aborts the run.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("cache I/O failed: {0}")]
    CacheIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
