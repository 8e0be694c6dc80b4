use crate::application::market_data::engine::AggregationEngine;
use crate::domain::errors::WarmupError;
use crate::domain::market::candle::SeriesKey;
use crate::domain::market::events::MarketDataEvent;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::HistoricalDataProvider;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

/// Per-(symbol, timeframe) warm-up progress. `completed` is monotonic
/// false→true within a run.
#[derive(Debug, Clone)]
pub struct WarmupState {
    pub required_count: usize,
    pub received_count: usize,
    pub completed: bool,
}

/// Warm-up summary for one symbol, read by strategies to decide whether
/// they may act on live signals.
#[derive(Debug, Clone)]
pub struct SymbolWarmupStatus {
    /// True only once every registered timeframe completed
    pub completed: bool,
    pub timeframes: HashMap<Timeframe, WarmupState>,
}

/// Drives the three-pass historical/live reconciliation per symbol.
///
/// Pass 1 loads closed base candles from the provider straight into the
/// buffer store. Pass 2 replays them through the resampler as if they had
/// arrived live, then flushes the final partial span. Pass 3 publishes one
/// CANDLE_CLOSED per stored candle, merged across timeframes in ascending
/// `open_time` order, so subscribers observe a single consistent history
/// before any live event. Only then does the symbol flip LIVE.
///
/// A run is idempotent: it clears the symbol's state first, so a cancelled
/// or failed run is retried from scratch, never resumed incrementally.
pub struct WarmupCoordinator {
    engine: Arc<AggregationEngine>,
    provider: Arc<dyn HistoricalDataProvider>,
    states: RwLock<HashMap<SeriesKey, WarmupState>>,
}

impl WarmupCoordinator {
    pub fn new(engine: Arc<AggregationEngine>, provider: Arc<dyn HistoricalDataProvider>) -> Self {
        Self {
            engine,
            provider,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Run the three passes for one symbol, bounded by the configured
    /// timeout. Timeout and short history are non-fatal: the symbol stays
    /// WARMING_UP and the error tells the caller why.
    pub async fn warmup_symbol(&self, symbol: &str) -> Result<(), WarmupError> {
        let timeout = Duration::from_secs(self.engine.config().warmup.timeout_seconds);
        let started = Instant::now();

        match tokio::time::timeout(timeout, self.run_passes(symbol)).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_secs = started.elapsed().as_secs();
                warn!(
                    "WarmupCoordinator: warm-up for {} timed out after {}s, symbol stays WARMING_UP",
                    symbol, elapsed_secs
                );
                self.engine
                    .bus()
                    .publish(&MarketDataEvent::WarmupTimeout {
                        symbol: symbol.to_string(),
                        elapsed_secs,
                    })
                    .await;
                Err(WarmupError::Timeout {
                    symbol: symbol.to_string(),
                    elapsed_secs,
                })
            }
        }
    }

    /// Warm up several symbols sequentially. Failures are logged and do not
    /// stop the remaining symbols; the failed ones stay WARMING_UP.
    pub async fn warmup_all(&self, symbols: &[&str]) -> Vec<(String, WarmupError)> {
        let mut failures = Vec::new();
        for &symbol in symbols {
            if let Err(e) = self.warmup_symbol(symbol).await {
                warn!("WarmupCoordinator: {} failed warm-up: {}", symbol, e);
                failures.push((symbol.to_string(), e));
            }
        }
        failures
    }

    async fn run_passes(&self, symbol: &str) -> Result<(), WarmupError> {
        let aggregation = self.engine.config().aggregation.clone();
        let warmup = self.engine.config().warmup.clone();
        let base = aggregation.base_timeframe;
        let timeframes = aggregation.all_timeframes();

        // Reset so a retry after cancellation starts clean
        self.engine.clear(Some(symbol)).await;
        self.engine.register_warming(symbol).await;
        {
            let mut states = self.states.write().await;
            for &tf in &timeframes {
                states.insert(
                    SeriesKey::new(symbol, tf),
                    WarmupState {
                        required_count: warmup.required_for(tf),
                        received_count: 0,
                        completed: false,
                    },
                );
            }
        }

        // Enough base candles to satisfy every timeframe's requirement
        let fetch_count = timeframes
            .iter()
            .map(|&tf| tf.base_candles_needed(base, warmup.required_for(tf)))
            .max()
            .unwrap_or(warmup.default_required);

        // Pass 1: load historical base candles straight into the store
        let bars = self
            .provider
            .fetch_historical(symbol, base, fetch_count)
            .await
            .map_err(|e| WarmupError::ProviderFailure {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        info!(
            "WarmupCoordinator: {} pass 1 loaded {} of {} requested {} candles",
            symbol,
            bars.len(),
            fetch_count,
            base
        );

        let mut loaded = 0usize;
        for candle in &bars {
            if self.engine.append_historical(candle.clone()).await.is_ok() {
                loaded += 1;
            }
        }
        self.record_received(symbol, base, loaded).await;

        // Pass 2: replay through the resampler exactly as if live, then
        // flush the trailing partial spans
        let mut derived_counts: HashMap<Timeframe, usize> = HashMap::new();
        for candle in &bars {
            for derived in self.engine.resample_replay(candle).await {
                *derived_counts.entry(derived.timeframe).or_default() += 1;
            }
        }
        for flushed in self.engine.flush_resampler(symbol).await {
            *derived_counts.entry(flushed.timeframe).or_default() += 1;
        }
        for (tf, count) in derived_counts {
            self.record_received(symbol, tf, count).await;
        }

        // Completeness gate: every timeframe must have its required tail
        // before anything is published
        {
            let states = self.states.read().await;
            for &tf in &timeframes {
                let state = states
                    .get(&SeriesKey::new(symbol, tf))
                    .expect("state inserted for every timeframe above");
                if state.received_count < state.required_count {
                    warn!(
                        "WarmupCoordinator: {}@{} received {} of {} required candles, staying WARMING_UP",
                        symbol, tf, state.received_count, state.required_count
                    );
                    return Err(WarmupError::InsufficientHistory {
                        symbol: symbol.to_string(),
                        timeframe: tf,
                        required: state.required_count,
                        received: state.received_count,
                    });
                }
            }
        }

        // Pass 3: publish the whole stored history once, merged across
        // timeframes in ascending open_time order
        let merged = self.engine.merged_history(symbol).await;
        let published = merged.len();
        for candle in merged {
            self.engine
                .bus()
                .publish(&MarketDataEvent::CandleClosed {
                    candle,
                    additional_data: None,
                })
                .await;
        }

        // All passes done: complete every timeframe, then go LIVE with the
        // builder primed to continue where the historical tail ended
        {
            let mut states = self.states.write().await;
            for &tf in &timeframes {
                if let Some(state) = states.get_mut(&SeriesKey::new(symbol, tf)) {
                    state.completed = true;
                }
            }
        }
        self.engine.seed_continuity(symbol).await;
        self.engine.mark_live(symbol).await;

        info!(
            "WarmupCoordinator: {} warm-up complete, published {} historical candles, symbol is LIVE",
            symbol, published
        );
        Ok(())
    }

    async fn record_received(&self, symbol: &str, timeframe: Timeframe, count: usize) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(&SeriesKey::new(symbol, timeframe)) {
            state.received_count += count;
        }
    }

    /// Warm-up state for one series
    pub async fn state(&self, symbol: &str, timeframe: Timeframe) -> Option<WarmupState> {
        self.states
            .read()
            .await
            .get(&SeriesKey::new(symbol, timeframe))
            .cloned()
    }

    /// Warm-up summary across all of a symbol's registered timeframes.
    /// `completed` is false for symbols never registered.
    pub async fn warmup_state(&self, symbol: &str) -> SymbolWarmupStatus {
        let states = self.states.read().await;
        let timeframes: HashMap<Timeframe, WarmupState> = states
            .iter()
            .filter(|(k, _)| k.symbol == symbol)
            .map(|(k, v)| (k.timeframe, v.clone()))
            .collect();
        let completed = !timeframes.is_empty() && timeframes.values().all(|s| s.completed);
        SymbolWarmupStatus {
            completed,
            timeframes,
        }
    }
}
