//! Observability configuration parsing from environment variables.
//!
//! This module handles loading heartbeat and monitoring configuration.

use std::env;

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_seconds: u64,
    /// Seconds of tick silence per symbol before the heartbeat task logs a
    /// stream-health warning
    pub silence_warning_seconds: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            heartbeat_enabled: true,
            heartbeat_interval_seconds: 30,
            silence_warning_seconds: 300,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_env() -> Self {
        Self {
            heartbeat_enabled: env::var("CANDLEGRID_HEARTBEAT_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            heartbeat_interval_seconds: env::var("CANDLEGRID_HEARTBEAT_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            silence_warning_seconds: env::var("CANDLEGRID_SILENCE_WARNING_SECONDS")
                .unwrap_or_else(|_| "300".to_string())
                .parse::<u64>()
                .unwrap_or(300),
        }
    }
}
