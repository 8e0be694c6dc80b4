use crate::domain::errors::{ConfigurationError, DataQualityError};
use crate::domain::market::candle::{Candle, SeriesKey};
use crate::domain::market::timeframe::Timeframe;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Bounded, ordered, in-memory storage for closed candles, one ring buffer
/// per (symbol, timeframe) series.
///
/// Stored `open_time`s are strictly increasing; duplicates and regressions
/// are rejected without touching the buffer. Queries return owned copies so
/// callers never hold references into live buffers.
pub struct BufferStore {
    default_capacity: usize,
    capacity_overrides: HashMap<SeriesKey, usize>,
    series: HashMap<SeriesKey, VecDeque<Candle>>,
}

impl BufferStore {
    pub fn new(default_capacity: usize) -> Result<Self, ConfigurationError> {
        if default_capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity { capacity: 0 });
        }
        Ok(Self {
            default_capacity,
            capacity_overrides: HashMap::new(),
            series: HashMap::new(),
        })
    }

    /// Override the capacity for one series. Existing excess entries are
    /// evicted oldest-first immediately.
    pub fn set_capacity(
        &mut self,
        key: SeriesKey,
        capacity: usize,
    ) -> Result<(), ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::NonPositiveCapacity { capacity });
        }
        if let Some(buffer) = self.series.get_mut(&key) {
            while buffer.len() > capacity {
                buffer.pop_front();
            }
        }
        self.capacity_overrides.insert(key, capacity);
        Ok(())
    }

    fn capacity_for(&self, key: &SeriesKey) -> usize {
        self.capacity_overrides
            .get(key)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Append a closed candle to its series, evicting the oldest entry when
    /// the buffer is full. Rejects non-monotonic `open_time` and malformed
    /// OHLC without modifying the buffer.
    pub fn append(&mut self, candle: Candle) -> Result<(), DataQualityError> {
        candle.validate()?;

        let key = candle.series_key();
        let capacity = self.capacity_for(&key);
        let buffer = self.series.entry(key).or_default();

        if let Some(last) = buffer.back()
            && candle.open_time <= last.open_time
        {
            return Err(DataQualityError::NonMonotonicAppend {
                symbol: candle.symbol.clone(),
                timeframe: candle.timeframe,
                open_time: candle.open_time,
                last_open_time: last.open_time,
            });
        }

        if buffer.len() >= capacity {
            let evicted = buffer.pop_front();
            if let Some(evicted) = evicted {
                debug!(
                    "BufferStore: evicted {}@{} candle at {}",
                    evicted.symbol, evicted.timeframe, evicted.open_time
                );
            }
        }
        buffer.push_back(candle);
        Ok(())
    }

    /// Most recent stored candle for a series
    pub fn get_latest(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.series
            .get(&SeriesKey::new(symbol, timeframe))
            .and_then(|b| b.back())
            .cloned()
    }

    /// Second most recent stored candle for a series
    pub fn get_previous(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let buffer = self.series.get(&SeriesKey::new(symbol, timeframe))?;
        if buffer.len() < 2 {
            return None;
        }
        buffer.get(buffer.len() - 2).cloned()
    }

    /// Up to `n` most recent candles in ascending `open_time` order. Returns
    /// fewer when there is less history; never errors for insufficient data.
    pub fn get_lookback(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        match self.series.get(&SeriesKey::new(symbol, timeframe)) {
            Some(buffer) => {
                let start = buffer.len().saturating_sub(n);
                buffer.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .get(&SeriesKey::new(symbol, timeframe))
            .map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.series.values().all(|b| b.is_empty())
    }

    /// Keys of all series currently holding data, unordered
    pub fn active_series(&self) -> Vec<SeriesKey> {
        self.series
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Every stored candle for one symbol across all its timeframes, merged
    /// in strictly ascending `open_time` order; ties are broken by shorter
    /// timeframe first so the base candle precedes the derived candle it
    /// contributed to.
    pub fn merged_history(&self, symbol: &str) -> Vec<Candle> {
        let mut merged: Vec<Candle> = self
            .series
            .iter()
            .filter(|(k, _)| k.symbol == symbol)
            .flat_map(|(_, b)| b.iter().cloned())
            .collect();
        merged.sort_by_key(|c| (c.open_time, c.timeframe.to_minutes()));
        merged
    }

    /// Drop all buffered data for one symbol, or everything. Used for
    /// backtest resets and warm-up re-runs.
    pub fn clear(&mut self, symbol: Option<&str>) {
        match symbol {
            Some(sym) => self.series.retain(|k, _| k.symbol != sym),
            None => self.series.clear(),
        }
    }
}
