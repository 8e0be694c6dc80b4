//! Configuration module for candlegrid.
//!
//! This module provides structured configuration loading from environment
//! variables, organized by concern: Aggregation, Warmup, and Observability.

mod aggregation_config;
mod observability_config;
mod warmup_config;

pub use aggregation_config::AggregationEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use warmup_config::WarmupEnvConfig;

use crate::domain::errors::ConfigurationError;

/// Main engine configuration.
///
/// Aggregates all configuration from sub-modules. Construct with
/// [`Config::from_env`] or build the sections programmatically and call
/// [`Config::validate`] before handing it to the engine.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub aggregation: AggregationEnvConfig,
    pub warmup: WarmupEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();
        let config = Self {
            aggregation: AggregationEnvConfig::from_env()?,
            warmup: WarmupEnvConfig::from_env()?,
            observability: ObservabilityEnvConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validation failures here are fatal: the engine refuses to start with
    /// a configuration it cannot honor.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.aggregation.validate()?;
        self.warmup.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_aggregation_propagates() {
        let mut config = Config::default();
        config.aggregation.base_timeframe = Timeframe::FifteenMin;
        config.aggregation.derived_timeframes = vec![Timeframe::FiveMin];
        assert!(config.validate().is_err());
    }
}
