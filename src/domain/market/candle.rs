use crate::domain::errors::DataQualityError;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle for one (symbol, timeframe) series.
///
/// While forming, the candle is mutated in place by the builder/resampler.
/// Once `is_closed` is set it must be treated as immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Period start in UTC milliseconds, aligned to the timeframe
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Volume-weighted average price over the period; equals `close` for
    /// zero-volume periods
    pub vwap: Decimal,
    pub trade_count: u32,
    pub is_closed: bool,
}

impl Candle {
    /// End of this candle's period (exclusive) in UTC milliseconds
    pub fn close_time(&self) -> i64 {
        self.open_time + self.timeframe.to_millis()
    }

    /// A synthetic flat candle for a period with zero ticks. Downstream
    /// consumers must never see a missing period, so gaps are filled with
    /// these instead of being skipped.
    pub fn synthetic_flat(
        symbol: &str,
        timeframe: Timeframe,
        open_time: i64,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            vwap: price,
            trade_count: 0,
            is_closed: true,
        }
    }

    /// Enforces `low <= {open, close} <= high` and non-negative volume
    pub fn validate(&self) -> Result<(), DataQualityError> {
        let ohlc_ok = self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.low <= self.high;

        if !ohlc_ok {
            return Err(DataQualityError::InvalidOhlc {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                open_time: self.open_time,
            });
        }

        if self.volume < Decimal::ZERO {
            return Err(DataQualityError::InvalidOhlc {
                symbol: self.symbol.clone(),
                timeframe: self.timeframe,
                open_time: self.open_time,
            });
        }

        Ok(())
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
        }
    }
}

/// Typed key identifying one (symbol, timeframe) series
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}
