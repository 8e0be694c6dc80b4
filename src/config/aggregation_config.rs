//! Aggregation pipeline configuration parsing from environment variables.

use crate::domain::errors::ConfigurationError;
use crate::domain::market::timeframe::{Alignment, Timeframe};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

/// Aggregation environment configuration
#[derive(Debug, Clone)]
pub struct AggregationEnvConfig {
    /// Smallest timeframe, built directly from ticks
    pub base_timeframe: Timeframe,
    /// Timeframes derived from the base by resampling
    pub derived_timeframes: Vec<Timeframe>,
    pub alignment: Alignment,
    /// Uniform per-series buffer capacity
    pub buffer_capacity: usize,
    /// Optional outlier filter: maximum relative deviation from the last
    /// confirmed close before a quote is dropped. None disables the filter.
    pub max_price_deviation: Option<Decimal>,
}

impl Default for AggregationEnvConfig {
    fn default() -> Self {
        Self {
            base_timeframe: Timeframe::OneMin,
            derived_timeframes: vec![Timeframe::FiveMin, Timeframe::FifteenMin],
            alignment: Alignment::Left,
            buffer_capacity: 500,
            max_price_deviation: None,
        }
    }
}

impl AggregationEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();

        let base_timeframe = parse_env("CANDLEGRID_BASE_TIMEFRAME", defaults.base_timeframe)?;

        let derived_timeframes = match env::var("CANDLEGRID_DERIVED_TIMEFRAMES") {
            Ok(raw) => {
                let mut tfs = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let tf = Timeframe::from_str(part).map_err(|_| {
                        ConfigurationError::InvalidValue {
                            key: "CANDLEGRID_DERIVED_TIMEFRAMES".to_string(),
                            value: part.to_string(),
                        }
                    })?;
                    tfs.push(tf);
                }
                tfs
            }
            Err(_) => defaults.derived_timeframes,
        };

        let alignment = parse_env("CANDLEGRID_ALIGNMENT", defaults.alignment)?;
        let buffer_capacity = parse_env("CANDLEGRID_BUFFER_CAPACITY", defaults.buffer_capacity)?;

        let max_price_deviation = match env::var("CANDLEGRID_MAX_PRICE_DEVIATION") {
            Ok(raw) => Some(Decimal::from_str(raw.trim()).map_err(|_| {
                ConfigurationError::InvalidValue {
                    key: "CANDLEGRID_MAX_PRICE_DEVIATION".to_string(),
                    value: raw,
                }
            })?),
            Err(_) => defaults.max_price_deviation,
        };

        Ok(Self {
            base_timeframe,
            derived_timeframes,
            alignment,
            buffer_capacity,
            max_price_deviation,
        })
    }

    /// Rejects configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity { capacity: 0 });
        }

        for &derived in &self.derived_timeframes {
            if derived.multiple_of(self.base_timeframe).is_none() {
                return Err(ConfigurationError::TimeframeNotMultiple {
                    base: self.base_timeframe,
                    derived,
                });
            }
        }

        Ok(())
    }

    /// All timeframes of a symbol's pipeline: base first, then derived
    pub fn all_timeframes(&self) -> Vec<Timeframe> {
        let mut tfs = vec![self.base_timeframe];
        tfs.extend(self.derived_timeframes.iter().copied());
        tfs
    }
}

/// Parse an env var via FromStr, falling back to the default when absent.
/// A present-but-unparsable value is a configuration error, not a silent
/// fallback.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigurationError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigurationError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(default),
    }
}
