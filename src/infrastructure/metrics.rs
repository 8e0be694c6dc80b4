//! Prometheus metrics definitions for candlegrid
//!
//! All metrics use the `candlegrid_` prefix. The heartbeat task reads the
//! cumulative counters for its snapshots; nothing here runs an HTTP server.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Aggregation pipeline metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks accepted into the builder
    pub ticks_total: IntCounter,
    /// Candles closed across all series (base + derived + synthetic)
    pub candles_closed_total: IntCounter,
    /// Candles closed per (symbol, timeframe)
    pub candles_closed_by_series: IntCounterVec,
    /// Updates dropped for data-quality reasons, by kind
    pub data_quality_errors_total: IntCounterVec,
    /// Subscriber handlers that returned an error
    pub dispatch_errors_total: IntCounter,
    /// Live ticks rejected because the symbol was still warming up
    pub ticks_rejected_warming_total: IntCounter,
    /// Symbols that completed warm-up and went live
    pub symbols_live: IntGauge,
    /// Active (symbol, timeframe) series in the buffer store
    pub active_series: IntGauge,
}

impl Metrics {
    /// Create a new Metrics instance with all counters and gauges registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_total = IntCounter::with_opts(Opts::new(
            "candlegrid_ticks_total",
            "Ticks accepted into the candle builder",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let candles_closed_total = IntCounter::with_opts(Opts::new(
            "candlegrid_candles_closed_total",
            "Candles closed across all series",
        ))?;
        registry.register(Box::new(candles_closed_total.clone()))?;

        let candles_closed_by_series = IntCounterVec::new(
            Opts::new(
                "candlegrid_candles_closed_by_series",
                "Candles closed per symbol and timeframe",
            ),
            &["symbol", "timeframe"],
        )?;
        registry.register(Box::new(candles_closed_by_series.clone()))?;

        let data_quality_errors_total = IntCounterVec::new(
            Opts::new(
                "candlegrid_data_quality_errors_total",
                "Updates dropped for data-quality reasons",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(data_quality_errors_total.clone()))?;

        let dispatch_errors_total = IntCounter::with_opts(Opts::new(
            "candlegrid_dispatch_errors_total",
            "Subscriber handlers that returned an error",
        ))?;
        registry.register(Box::new(dispatch_errors_total.clone()))?;

        let ticks_rejected_warming_total = IntCounter::with_opts(Opts::new(
            "candlegrid_ticks_rejected_warming_total",
            "Live ticks rejected while the symbol was warming up",
        ))?;
        registry.register(Box::new(ticks_rejected_warming_total.clone()))?;

        let symbols_live = IntGauge::with_opts(Opts::new(
            "candlegrid_symbols_live",
            "Symbols that completed warm-up",
        ))?;
        registry.register(Box::new(symbols_live.clone()))?;

        let active_series = IntGauge::with_opts(Opts::new(
            "candlegrid_active_series",
            "Active (symbol, timeframe) series",
        ))?;
        registry.register(Box::new(active_series.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_total,
            candles_closed_total,
            candles_closed_by_series,
            data_quality_errors_total,
            dispatch_errors_total,
            ticks_rejected_warming_total,
            symbols_live,
            active_series,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn export_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();
        metrics.ticks_total.inc();
        metrics.ticks_total.inc();
        metrics
            .candles_closed_by_series
            .with_label_values(&["BTC/USD", "1m"])
            .inc();
        metrics
            .data_quality_errors_total
            .with_label_values(&["out_of_order_tick"])
            .inc();

        assert_eq!(metrics.ticks_total.get(), 2);
        assert_eq!(
            metrics
                .candles_closed_by_series
                .with_label_values(&["BTC/USD", "1m"])
                .get(),
            1
        );
    }

    #[test]
    fn test_export_text() {
        let metrics = Metrics::new().unwrap();
        metrics.candles_closed_total.inc();
        let text = metrics.export_text().unwrap();
        assert!(text.contains("candlegrid_candles_closed_total"));
    }
}
