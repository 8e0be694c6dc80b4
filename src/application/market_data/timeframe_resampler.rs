use crate::domain::errors::ConfigurationError;
use crate::domain::market::candle::{Candle, SeriesKey};
use crate::domain::market::timeframe::{Alignment, Timeframe};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug)]
struct PartialAggregate {
    /// Bucket start under the configured alignment (not necessarily the
    /// stored open_time label)
    bucket_start: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    cumulative_pv: Decimal,
    trade_count: u32,
    base_count: usize,
}

impl PartialAggregate {
    fn new(bucket_start: i64, candle: &Candle) -> Self {
        Self {
            bucket_start,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            cumulative_pv: candle.vwap * candle.volume,
            trade_count: candle.trade_count,
            base_count: 1,
        }
    }

    fn merge(&mut self, candle: &Candle) {
        // Open stays the first sub-candle's open
        if candle.high > self.high {
            self.high = candle.high;
        }
        if candle.low < self.low {
            self.low = candle.low;
        }
        self.close = candle.close;
        self.volume += candle.volume;
        self.cumulative_pv += candle.vwap * candle.volume;
        self.trade_count += candle.trade_count;
        self.base_count += 1;
    }

    fn build(&self, symbol: &str, timeframe: Timeframe, alignment: Alignment) -> Candle {
        let vwap = if self.volume > Decimal::ZERO {
            self.cumulative_pv / self.volume
        } else {
            self.close
        };
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: timeframe.open_label(self.bucket_start, alignment),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap,
            trade_count: self.trade_count,
            is_closed: true,
        }
    }
}

/// Derives every configured higher timeframe from closed base candles.
///
/// Maintains one partial aggregate per (symbol, derived timeframe). An
/// aggregate closes when its span's last sub-period arrives, or when a base
/// candle for a later span shows up (jump past a boundary), or on an
/// explicit [`flush_pending`](Self::flush_pending) at the end of a replay.
pub struct TimeframeResampler {
    base: Timeframe,
    derived: Vec<Timeframe>,
    alignment: Alignment,
    partials: HashMap<SeriesKey, PartialAggregate>,
}

impl TimeframeResampler {
    /// Fails when a derived timeframe is not a strict integer multiple of
    /// the base.
    pub fn new(
        base: Timeframe,
        derived: Vec<Timeframe>,
        alignment: Alignment,
    ) -> Result<Self, ConfigurationError> {
        for &tf in &derived {
            if tf.multiple_of(base).is_none() {
                return Err(ConfigurationError::TimeframeNotMultiple { base, derived: tf });
            }
        }
        Ok(Self {
            base,
            derived,
            alignment,
            partials: HashMap::new(),
        })
    }

    pub fn derived_timeframes(&self) -> &[Timeframe] {
        &self.derived
    }

    /// Merge one closed base candle into every derived series. Returns the
    /// derived candles that closed as a result, in configuration order.
    pub fn on_base_candle_closed(&mut self, candle: &Candle) -> Vec<Candle> {
        let mut completed = Vec::new();

        for &timeframe in &self.derived {
            let key = SeriesKey::new(&candle.symbol, timeframe);
            let bucket_start = timeframe.bucket_start(candle.open_time, self.alignment);
            let bucket_end = bucket_start + timeframe.to_millis();

            match self.partials.get_mut(&key) {
                Some(partial) if partial.bucket_start == bucket_start => {
                    partial.merge(candle);
                }
                Some(_) => {
                    // The base series jumped into a new span; close the old
                    // aggregate as-is before starting the new one
                    let partial = self
                        .partials
                        .remove(&key)
                        .expect("partial verified to exist by get_mut check");
                    debug!(
                        "TimeframeResampler: {} span closed by boundary jump ({} base candles)",
                        key, partial.base_count
                    );
                    completed.push(partial.build(&candle.symbol, timeframe, self.alignment));
                    self.partials
                        .insert(key.clone(), PartialAggregate::new(bucket_start, candle));
                }
                None => {
                    self.partials
                        .insert(key.clone(), PartialAggregate::new(bucket_start, candle));
                }
            }

            // Last sub-period of the span closes the aggregate in place
            if candle.open_time + self.base.to_millis() >= bucket_end
                && let Some(partial) = self.partials.remove(&key)
            {
                completed.push(partial.build(&candle.symbol, timeframe, self.alignment));
            }
        }

        completed
    }

    /// Force-close every partial aggregate, for one symbol or all. Used at
    /// the end of a historical replay so the final partially-covered span is
    /// stored instead of left dangling; the resulting candle may cover fewer
    /// base candles than a full span.
    pub fn flush_pending(&mut self, symbol: Option<&str>) -> Vec<Candle> {
        let keys: Vec<SeriesKey> = self
            .partials
            .keys()
            .filter(|k| symbol.is_none_or(|s| k.symbol == s))
            .cloned()
            .collect();

        let mut flushed = Vec::new();
        for key in keys {
            if let Some(partial) = self.partials.remove(&key) {
                debug!(
                    "TimeframeResampler: {} flushed with {} base candle(s)",
                    key, partial.base_count
                );
                flushed.push(partial.build(&key.symbol, key.timeframe, self.alignment));
            }
        }
        flushed
    }

    /// Current partial aggregate's candle snapshot (for monitoring)
    pub fn pending_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.partials
            .get(&SeriesKey::new(symbol, timeframe))
            .map(|p| {
                let mut c = p.build(symbol, timeframe, self.alignment);
                c.is_closed = false;
                c
            })
    }

    pub fn clear(&mut self, symbol: Option<&str>) {
        match symbol {
            Some(sym) => self.partials.retain(|k, _| k.symbol != sym),
            None => self.partials.clear(),
        }
    }
}
