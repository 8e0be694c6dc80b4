//! Warm-up configuration parsing from environment variables.

use crate::domain::errors::ConfigurationError;
use crate::domain::market::timeframe::Timeframe;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

/// Warm-up environment configuration
#[derive(Debug, Clone)]
pub struct WarmupEnvConfig {
    /// Per-timeframe required candle counts; `default_required` applies to
    /// timeframes without an explicit entry
    pub required_candles: HashMap<Timeframe, usize>,
    pub default_required: usize,
    pub timeout_seconds: u64,
}

impl Default for WarmupEnvConfig {
    fn default() -> Self {
        Self {
            required_candles: HashMap::new(),
            default_required: 100,
            timeout_seconds: 120,
        }
    }
}

impl WarmupEnvConfig {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let defaults = Self::default();

        // Format: "1m:100,5m:20" or a plain number applied to every timeframe
        let (required_candles, default_required) =
            match env::var("CANDLEGRID_WARMUP_REQUIRED_CANDLES") {
                Ok(raw) => {
                    if let Ok(n) = raw.trim().parse::<usize>() {
                        (HashMap::new(), n)
                    } else {
                        let mut map = HashMap::new();
                        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                            let invalid = || ConfigurationError::InvalidValue {
                                key: "CANDLEGRID_WARMUP_REQUIRED_CANDLES".to_string(),
                                value: part.to_string(),
                            };
                            let (tf_raw, count_raw) = part.split_once(':').ok_or_else(invalid)?;
                            let tf = Timeframe::from_str(tf_raw.trim()).map_err(|_| invalid())?;
                            let count =
                                count_raw.trim().parse::<usize>().map_err(|_| invalid())?;
                            map.insert(tf, count);
                        }
                        (map, defaults.default_required)
                    }
                }
                Err(_) => (defaults.required_candles, defaults.default_required),
            };

        let timeout_seconds = match env::var("CANDLEGRID_WARMUP_TIMEOUT_SECONDS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigurationError::InvalidValue {
                    key: "CANDLEGRID_WARMUP_TIMEOUT_SECONDS".to_string(),
                    value: raw,
                })?,
            Err(_) => defaults.timeout_seconds,
        };

        Ok(Self {
            required_candles,
            default_required,
            timeout_seconds,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.default_required == 0 {
            return Err(ConfigurationError::NonPositiveWarmupCount {
                timeframe: Timeframe::OneMin,
            });
        }
        for (&tf, &count) in &self.required_candles {
            if count == 0 {
                return Err(ConfigurationError::NonPositiveWarmupCount { timeframe: tf });
            }
        }
        Ok(())
    }

    /// Required candle count for one timeframe
    pub fn required_for(&self, timeframe: Timeframe) -> usize {
        self.required_candles
            .get(&timeframe)
            .copied()
            .unwrap_or(self.default_required)
    }
}
