use crate::application::market_data::buffer_store::BufferStore;
use crate::application::market_data::candle_builder::CandleBuilder;
use crate::application::market_data::timeframe_resampler::TimeframeResampler;
use crate::config::Config;
use crate::domain::errors::DataQualityError;
use crate::domain::market::candle::{Candle, SeriesKey};
use crate::domain::market::events::{HeartbeatSnapshot, MarketDataEvent};
use crate::domain::market::timeframe::Timeframe;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::metrics::Metrics;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Per-symbol ingestion lifecycle. WARMING_UP symbols reject live ticks
/// until their warm-up completes; symbols never registered for warm-up are
/// live from their first tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLifecycle {
    WarmingUp,
    Live,
}

struct PipelineState {
    builder: CandleBuilder,
    resampler: TimeframeResampler,
    store: BufferStore,
    lifecycle: HashMap<String, SymbolLifecycle>,
    last_tick_times: HashMap<String, i64>,
}

/// The aggregation pipeline root: ticks (or broker-pushed base candles) in,
/// buffered multi-timeframe series and bus events out.
///
/// Explicitly constructed and shared as `Arc<AggregationEngine>`; there is
/// no ambient global instance. All pipeline state lives behind one async
/// lock, which keeps the one-writer-per-series invariant trivially true;
/// queries return copies, never references into live buffers.
pub struct AggregationEngine {
    config: Config,
    state: RwLock<PipelineState>,
    bus: EventBus,
    metrics: Metrics,
}

impl AggregationEngine {
    /// Fails fast on invalid configuration; a series the configuration
    /// cannot describe never runs.
    pub fn new(config: Config, bus: EventBus) -> anyhow::Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()?;
        bus.attach_metrics(metrics.clone());

        let builder = CandleBuilder::new(
            config.aggregation.base_timeframe,
            config.aggregation.max_price_deviation,
        );
        let resampler = TimeframeResampler::new(
            config.aggregation.base_timeframe,
            config.aggregation.derived_timeframes.clone(),
            config.aggregation.alignment,
        )?;
        let store = BufferStore::new(config.aggregation.buffer_capacity)?;

        Ok(Self {
            config,
            state: RwLock::new(PipelineState {
                builder,
                resampler,
                store,
                lifecycle: HashMap::new(),
                last_tick_times: HashMap::new(),
            }),
            bus,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ingest one live tick. Data-quality problems are logged and counted,
    /// never raised to the feed; ticks for WARMING_UP symbols are dropped
    /// until warm-up completes.
    pub async fn on_tick(&self, symbol: &str, price: Decimal, volume: Decimal, timestamp_ms: i64) {
        let events = {
            let mut state = self.state.write().await;

            if state.lifecycle.get(symbol) == Some(&SymbolLifecycle::WarmingUp) {
                self.metrics.ticks_rejected_warming_total.inc();
                debug!("AggregationEngine: dropped tick for warming symbol {}", symbol);
                return;
            }

            let outcome = match state.builder.on_tick(symbol, price, volume, timestamp_ms) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.record_data_quality_error(&e);
                    return;
                }
            };

            self.metrics.ticks_total.inc();
            state
                .last_tick_times
                .insert(symbol.to_string(), timestamp_ms);

            let mut events = Vec::new();
            for closed in outcome.closed {
                self.handle_closed_base(&mut state, closed, &mut events);
            }
            if let Some(opened) = outcome.opened {
                events.push(MarketDataEvent::NewCandle {
                    candle: opened,
                    additional_data: None,
                });
            }
            events
        };

        self.publish_all(events).await;
    }

    /// Ingest one broker-pushed, already-closed base candle (the
    /// pass-through ingestion mode).
    pub async fn on_base_candle(&self, candle: Candle) {
        let events = {
            let mut state = self.state.write().await;

            if state.lifecycle.get(&candle.symbol) == Some(&SymbolLifecycle::WarmingUp) {
                self.metrics.ticks_rejected_warming_total.inc();
                debug!(
                    "AggregationEngine: dropped pushed candle for warming symbol {}",
                    candle.symbol
                );
                return;
            }

            let symbol = candle.symbol.clone();
            let last_data_time = candle.close_time();

            let closed = match state.builder.on_base_candle(candle) {
                Ok(closed) => closed,
                Err(e) => {
                    self.record_data_quality_error(&e);
                    return;
                }
            };

            state.last_tick_times.insert(symbol, last_data_time);

            let mut events = Vec::new();
            for candle in closed {
                self.handle_closed_base(&mut state, candle, &mut events);
            }
            events
        };

        self.publish_all(events).await;
    }

    /// Force the base-period boundary for a symbol at `now_ms`, closing a
    /// FORMING candle the tick stream has moved past.
    pub async fn on_period_boundary(&self, symbol: &str, now_ms: i64) {
        let events = {
            let mut state = self.state.write().await;
            let closed = state.builder.on_period_boundary(symbol, now_ms);
            let mut events = Vec::new();
            for candle in closed {
                self.handle_closed_base(&mut state, candle, &mut events);
            }
            events
        };

        self.publish_all(events).await;
    }

    /// Store a closed candle, cascade it through the resampler, and queue
    /// the CANDLE_CLOSED events. Rejected appends drop the candle and its
    /// event but never the rest of the batch.
    fn handle_closed_base(
        &self,
        state: &mut PipelineState,
        candle: Candle,
        events: &mut Vec<MarketDataEvent>,
    ) {
        if let Err(e) = state.store.append(candle.clone()) {
            self.record_data_quality_error(&e);
            return;
        }
        self.record_candle_closed(&candle);
        let derived = state.resampler.on_base_candle_closed(&candle);
        events.push(MarketDataEvent::CandleClosed {
            candle,
            additional_data: None,
        });

        for derived_candle in derived {
            if let Err(e) = state.store.append(derived_candle.clone()) {
                self.record_data_quality_error(&e);
                continue;
            }
            self.record_candle_closed(&derived_candle);
            events.push(MarketDataEvent::CandleClosed {
                candle: derived_candle,
                additional_data: None,
            });
        }
    }

    async fn publish_all(&self, events: Vec<MarketDataEvent>) {
        for event in events {
            self.bus.publish(&event).await;
        }
    }

    fn record_candle_closed(&self, candle: &Candle) {
        self.metrics.candles_closed_total.inc();
        self.metrics
            .candles_closed_by_series
            .with_label_values(&[&candle.symbol, candle.timeframe.code()])
            .inc();
    }

    fn record_data_quality_error(&self, error: &DataQualityError) {
        warn!("AggregationEngine: dropped update: {}", error);
        self.metrics
            .data_quality_errors_total
            .with_label_values(&[error.kind()])
            .inc();
    }

    // ---- Warm-up support ----------------------------------------------

    /// Mark a symbol WARMING_UP; its live ticks are dropped until
    /// [`mark_live`](Self::mark_live).
    pub async fn register_warming(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state
            .lifecycle
            .insert(symbol.to_string(), SymbolLifecycle::WarmingUp);
    }

    /// Irreversibly (within one run) flip a symbol to LIVE
    pub async fn mark_live(&self, symbol: &str) {
        let mut state = self.state.write().await;
        state
            .lifecycle
            .insert(symbol.to_string(), SymbolLifecycle::Live);
        let live = state
            .lifecycle
            .values()
            .filter(|l| **l == SymbolLifecycle::Live)
            .count();
        self.metrics.symbols_live.set(live as i64);
    }

    pub async fn lifecycle(&self, symbol: &str) -> Option<SymbolLifecycle> {
        self.state.read().await.lifecycle.get(symbol).copied()
    }

    /// Insert an already-closed historical candle directly, bypassing the
    /// builder (warm-up Pass 1).
    pub async fn append_historical(&self, mut candle: Candle) -> Result<(), DataQualityError> {
        candle.is_closed = true;
        let mut state = self.state.write().await;
        state.store.append(candle.clone())?;
        self.record_candle_closed(&candle);
        Ok(())
    }

    /// Replay one historical base candle through the resampler, storing any
    /// derived candles it closes (warm-up Pass 2). No events are published.
    pub async fn resample_replay(&self, candle: &Candle) -> Vec<Candle> {
        let mut state = self.state.write().await;
        let derived = state.resampler.on_base_candle_closed(candle);
        let mut stored = Vec::with_capacity(derived.len());
        for derived_candle in derived {
            match state.store.append(derived_candle.clone()) {
                Ok(()) => {
                    self.record_candle_closed(&derived_candle);
                    stored.push(derived_candle);
                }
                Err(e) => self.record_data_quality_error(&e),
            }
        }
        stored
    }

    /// Force-close the resampler's partial aggregates for a symbol and store
    /// them (end of warm-up Pass 2).
    pub async fn flush_resampler(&self, symbol: &str) -> Vec<Candle> {
        let mut state = self.state.write().await;
        let flushed = state.resampler.flush_pending(Some(symbol));
        let mut stored = Vec::with_capacity(flushed.len());
        for candle in flushed {
            match state.store.append(candle.clone()) {
                Ok(()) => {
                    self.record_candle_closed(&candle);
                    stored.push(candle);
                }
                Err(e) => self.record_data_quality_error(&e),
            }
        }
        stored
    }

    /// Every stored candle for a symbol across its timeframes, merged in
    /// ascending `open_time` order (warm-up Pass 3 publish order).
    pub async fn merged_history(&self, symbol: &str) -> Vec<Candle> {
        self.state.read().await.store.merged_history(symbol)
    }

    /// Prime the builder with the last stored base candle so live ingestion
    /// continues the warmed-up series without a seam gap: a first live tick
    /// arriving several periods after the historical tail gap-fills the
    /// periods in between.
    pub async fn seed_continuity(&self, symbol: &str) {
        let base = self.config.aggregation.base_timeframe;
        let mut state = self.state.write().await;
        if let Some(last) = state.store.get_latest(symbol, base) {
            state
                .builder
                .seed_continuity(symbol, last.open_time, last.close);
        }
    }

    // ---- Query API -----------------------------------------------------

    pub async fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.state.read().await.store.get_latest(symbol, timeframe)
    }

    pub async fn get_previous(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.state.read().await.store.get_previous(symbol, timeframe)
    }

    pub async fn get_lookback(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Vec<Candle> {
        self.state.read().await.store.get_lookback(symbol, timeframe, n)
    }

    pub async fn active_series(&self) -> Vec<SeriesKey> {
        self.state.read().await.store.active_series()
    }

    /// Drop buffered data and builder/resampler state for one symbol or
    /// everything. Used for backtest resets and warm-up re-runs.
    pub async fn clear(&self, symbol: Option<&str>) {
        let mut state = self.state.write().await;
        state.builder.clear(symbol);
        state.resampler.clear(symbol);
        state.store.clear(symbol);
        match symbol {
            Some(sym) => {
                state.lifecycle.remove(sym);
                state.last_tick_times.remove(sym);
            }
            None => {
                state.lifecycle.clear();
                state.last_tick_times.clear();
            }
        }
    }

    /// Aggregate status snapshot read by the heartbeat task
    pub async fn heartbeat_snapshot(&self) -> HeartbeatSnapshot {
        let state = self.state.read().await;
        let series = state.store.active_series();
        self.metrics.active_series.set(series.len() as i64);

        let mut active_symbols: Vec<String> =
            series.iter().map(|k| k.symbol.clone()).collect();
        active_symbols.sort();
        active_symbols.dedup();

        let mut active_timeframes: Vec<Timeframe> =
            series.iter().map(|k| k.timeframe).collect();
        active_timeframes.sort();
        active_timeframes.dedup();

        HeartbeatSnapshot {
            timestamp: Utc::now(),
            tick_count: self.metrics.ticks_total.get(),
            candle_count: self.metrics.candles_closed_total.get(),
            active_symbols,
            active_timeframes,
            last_tick_times: state.last_tick_times.clone(),
        }
    }
}
