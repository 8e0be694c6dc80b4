use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents different timeframe intervals for market data aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    /// Returns the duration of this timeframe in minutes
    pub fn to_minutes(&self) -> usize {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        (self.to_minutes() * 60) as i64
    }

    /// Returns the duration in milliseconds
    pub fn to_millis(&self) -> i64 {
        self.to_seconds() * 1000
    }

    /// Canonical short code ("1m", "5m", ...)
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    /// Returns all available timeframes in ascending order
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }

    /// How many `base` periods fit into one period of this timeframe.
    ///
    /// Returns `None` unless this timeframe is a strict integer multiple of
    /// `base` (a timeframe is not considered a multiple of itself).
    pub fn multiple_of(&self, base: Timeframe) -> Option<usize> {
        let mine = self.to_minutes();
        let theirs = base.to_minutes();
        if mine > theirs && mine % theirs == 0 {
            Some(mine / theirs)
        } else {
            None
        }
    }

    /// Checks if a timestamp aligns with the start of this timeframe period
    pub fn is_period_start(&self, timestamp_ms: i64) -> bool {
        timestamp_ms % self.to_millis() == 0
    }

    /// Returns the start timestamp of the period containing the given
    /// timestamp, truncated down (left alignment).
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let period_ms = self.to_millis();
        timestamp_ms - timestamp_ms.rem_euclid(period_ms)
    }

    /// Start of the period containing `timestamp_ms` under the given
    /// alignment. `Left` and `Right` share bucket boundaries; `Center`
    /// shifts the boundaries by half a period.
    pub fn bucket_start(&self, timestamp_ms: i64, alignment: Alignment) -> i64 {
        let period_ms = self.to_millis();
        match alignment {
            Alignment::Left | Alignment::Right => self.period_start(timestamp_ms),
            Alignment::Center => {
                let half = period_ms / 2;
                let shifted = timestamp_ms + half;
                shifted - shifted.rem_euclid(period_ms) - half
            }
        }
    }

    /// The `open_time` label stored for a candle whose bucket begins at
    /// `bucket_start_ms`. Right alignment labels the candle with the period
    /// end; the other alignments label it with the bucket start.
    pub fn open_label(&self, bucket_start_ms: i64, alignment: Alignment) -> i64 {
        match alignment {
            Alignment::Left | Alignment::Center => bucket_start_ms,
            Alignment::Right => bucket_start_ms + self.to_millis(),
        }
    }

    /// Number of base-timeframe candles needed to build `count` candles of
    /// this timeframe. Identity when this IS the base timeframe.
    pub fn base_candles_needed(&self, base: Timeframe, count: usize) -> usize {
        match self.multiple_of(base) {
            Some(k) => count * k,
            None => count,
        }
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" | "onemin" => Ok(Timeframe::OneMin),
            "5m" | "5min" | "fivemin" => Ok(Timeframe::FiveMin),
            "15m" | "15min" | "fifteenmin" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" | "onehour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" | "fourhour" => Ok(Timeframe::FourHour),
            "1d" | "1day" | "oneday" => Ok(Timeframe::OneDay),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 15m, 1h, 4h, 1d",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Rule for mapping a sub-period's timestamp to its containing aggregate
/// period when resampling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alignment {
    #[default]
    Left,
    Right,
    Center,
}

impl FromStr for Alignment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "left" => Ok(Alignment::Left),
            "right" => Ok(Alignment::Right),
            "center" => Ok(Alignment::Center),
            _ => Err(anyhow!(
                "Invalid alignment: '{}'. Valid options: left, right, center",
                s
            )),
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alignment::Left => write!(f, "left"),
            Alignment::Right => write!(f, "right"),
            Alignment::Center => write!(f, "center"),
        }
    }
}
