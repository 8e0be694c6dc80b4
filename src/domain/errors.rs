use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use thiserror::Error;

/// Recoverable data-quality problems. The offending update is dropped and
/// counted; processing continues.
#[derive(Debug, Error)]
pub enum DataQualityError {
    #[error("Out-of-order tick for {symbol}: timestamp {timestamp} before current period start {period_start}")]
    OutOfOrderTick {
        symbol: String,
        timestamp: i64,
        period_start: i64,
    },

    #[error("Non-monotonic append for {symbol}@{timeframe}: open_time {open_time} <= last stored {last_open_time}")]
    NonMonotonicAppend {
        symbol: String,
        timeframe: Timeframe,
        open_time: i64,
        last_open_time: i64,
    },

    #[error("Invalid OHLC for {symbol}@{timeframe} at {open_time}")]
    InvalidOhlc {
        symbol: String,
        timeframe: Timeframe,
        open_time: i64,
    },

    #[error("Invalid tick for {symbol}: {reason}")]
    InvalidTick { symbol: String, reason: String },

    #[error("Outlier quote for {symbol} dropped: {price} deviates from reference {reference}")]
    OutlierDropped {
        symbol: String,
        price: Decimal,
        reference: Decimal,
    },
}

impl DataQualityError {
    /// Stable label used as the metrics `kind` dimension
    pub fn kind(&self) -> &'static str {
        match self {
            DataQualityError::OutOfOrderTick { .. } => "out_of_order_tick",
            DataQualityError::NonMonotonicAppend { .. } => "non_monotonic_append",
            DataQualityError::InvalidOhlc { .. } => "invalid_ohlc",
            DataQualityError::InvalidTick { .. } => "invalid_tick",
            DataQualityError::OutlierDropped { .. } => "outlier_dropped",
        }
    }
}

/// Fatal configuration problems, raised at construction time. A series with
/// invalid configuration refuses to run.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Derived timeframe {derived} is not an integer multiple of base {base}")]
    TimeframeNotMultiple { base: Timeframe, derived: Timeframe },

    #[error("No derived timeframes configured")]
    NoDerivedTimeframes,

    #[error("Buffer capacity must be positive, got {capacity}")]
    NonPositiveCapacity { capacity: usize },

    #[error("Warm-up required count must be positive for {timeframe}")]
    NonPositiveWarmupCount { timeframe: Timeframe },

    #[error("Invalid configuration value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Warm-up failures. Non-fatal: the symbol stays WARMING_UP and the caller
/// may retry the whole three-pass run.
#[derive(Debug, Error)]
pub enum WarmupError {
    #[error("Warm-up for {symbol} timed out after {elapsed_secs}s")]
    Timeout { symbol: String, elapsed_secs: u64 },

    #[error("Insufficient history for {symbol}@{timeframe}: required {required}, received {received}")]
    InsufficientHistory {
        symbol: String,
        timeframe: Timeframe,
        required: usize,
        received: usize,
    },

    #[error("Historical data provider failed for {symbol}: {reason}")]
    ProviderFailure { symbol: String, reason: String },
}

/// A subscriber handler failed. Caught per handler so one faulty subscriber
/// cannot block delivery to the others.
#[derive(Debug, Error)]
#[error("Handler '{handler}' failed on {event_type} for {topic}: {reason}")]
pub struct DispatchError {
    pub event_type: String,
    pub topic: String,
    pub handler: String,
    pub reason: String,
}
