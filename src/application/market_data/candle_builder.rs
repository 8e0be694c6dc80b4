use crate::domain::errors::DataQualityError;
use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outlier filtering only kicks in once a candle has a few ticks behind it;
/// earlier there is not enough data to judge a deviation.
const MIN_TICKS_FOR_OUTLIER_FILTER: u32 = 3;

#[derive(Debug)]
struct FormingCandle {
    open_time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    /// Running sum of price * volume for the VWAP
    cumulative_pv: Decimal,
    trade_count: u32,
}

impl FormingCandle {
    fn new(open_time: i64, price: Decimal, volume: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            cumulative_pv: price * volume,
            trade_count: 1,
        }
    }

    fn update(&mut self, price: Decimal, volume: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += volume;
        self.cumulative_pv += price * volume;
        self.trade_count += 1;
    }

    fn vwap(&self) -> Decimal {
        if self.volume > Decimal::ZERO {
            self.cumulative_pv / self.volume
        } else {
            self.close
        }
    }

    fn build(&self, symbol: &str, timeframe: Timeframe, is_closed: bool) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap(),
            trade_count: self.trade_count,
            is_closed,
        }
    }
}

/// Result of ingesting one tick: zero or more candles closed (including
/// synthetic gap fills), and optionally a snapshot of the newly opened
/// FORMING candle.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub closed: Vec<Candle>,
    pub opened: Option<Candle>,
}

/// Accumulates raw price/volume updates into the base-timeframe candle for
/// each symbol.
///
/// Period boundaries are driven by tick timestamps, never a wall clock, so
/// replays and backtests behave identically to live ingestion. A period
/// with zero ticks is emitted as a synthetic flat candle so downstream
/// consumers never see a missing period.
pub struct CandleBuilder {
    base: Timeframe,
    forming: HashMap<String, FormingCandle>,
    /// Last confirmed close per symbol, used for gap fills and the optional
    /// cross-candle outlier filter
    last_close: HashMap<String, Decimal>,
    /// Period start of the last closed candle per symbol (pass-through mode
    /// tracks this without a forming candle)
    last_period: HashMap<String, i64>,
    max_price_deviation: Option<Decimal>,
}

impl CandleBuilder {
    pub fn new(base: Timeframe, max_price_deviation: Option<Decimal>) -> Self {
        Self {
            base,
            forming: HashMap::new(),
            last_close: HashMap::new(),
            last_period: HashMap::new(),
            max_price_deviation,
        }
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.base
    }

    /// Ingest one tick. Returns the candles it closed (the previous period
    /// plus any synthetic fills) and a snapshot of a newly opened FORMING
    /// candle, or a data-quality error when the tick must be dropped.
    pub fn on_tick(
        &mut self,
        symbol: &str,
        price: Decimal,
        volume: Decimal,
        timestamp_ms: i64,
    ) -> Result<TickOutcome, DataQualityError> {
        if price <= Decimal::ZERO {
            return Err(DataQualityError::InvalidTick {
                symbol: symbol.to_string(),
                reason: format!("non-positive price {}", price),
            });
        }
        if volume < Decimal::ZERO {
            return Err(DataQualityError::InvalidTick {
                symbol: symbol.to_string(),
                reason: format!("negative volume {}", volume),
            });
        }

        let tick_period = self.base.period_start(timestamp_ms);

        // Ticks may never mutate an already-closed period
        if let Some(forming) = self.forming.get(symbol) {
            if tick_period < forming.open_time {
                return Err(DataQualityError::OutOfOrderTick {
                    symbol: symbol.to_string(),
                    timestamp: timestamp_ms,
                    period_start: forming.open_time,
                });
            }
        } else if let Some(&last) = self.last_period.get(symbol)
            && tick_period <= last
        {
            return Err(DataQualityError::OutOfOrderTick {
                symbol: symbol.to_string(),
                timestamp: timestamp_ms,
                period_start: last + self.base.to_millis(),
            });
        }

        if self.is_outlier(symbol, price) {
            let reference = self
                .last_close
                .get(symbol)
                .copied()
                .unwrap_or(Decimal::ZERO);
            return Err(DataQualityError::OutlierDropped {
                symbol: symbol.to_string(),
                price,
                reference,
            });
        }

        let mut outcome = TickOutcome::default();

        match self.forming.get_mut(symbol) {
            Some(forming) if forming.open_time == tick_period => {
                forming.update(price, volume);
            }
            Some(_) => {
                // Boundary crossed: close the old period, fill any gap,
                // then open the new period with this tick
                let forming = self
                    .forming
                    .remove(symbol)
                    .expect("forming verified to exist by get_mut check");
                let closed = forming.build(symbol, self.base, true);
                info!(
                    "CandleBuilder: {} {} candle closed O:{} H:{} L:{} C:{} V:{}",
                    symbol, self.base, closed.open, closed.high, closed.low, closed.close,
                    closed.volume
                );
                self.last_close.insert(symbol.to_string(), closed.close);
                self.last_period.insert(symbol.to_string(), closed.open_time);
                let gap_start = closed.open_time + self.base.to_millis();
                outcome.closed.push(closed);
                self.fill_gap(symbol, gap_start, tick_period, &mut outcome.closed);

                let forming = FormingCandle::new(tick_period, price, volume);
                outcome.opened = Some(forming.build(symbol, self.base, false));
                self.forming.insert(symbol.to_string(), forming);
            }
            None => {
                // First tick ever, or first tick after an explicit boundary
                // close; in the latter case any skipped periods are filled
                if let Some(&last) = self.last_period.get(symbol) {
                    self.fill_gap(
                        symbol,
                        last + self.base.to_millis(),
                        tick_period,
                        &mut outcome.closed,
                    );
                } else {
                    debug!(
                        "CandleBuilder: {} first tick @ {}, starting aggregation",
                        symbol, price
                    );
                }
                let forming = FormingCandle::new(tick_period, price, volume);
                outcome.opened = Some(forming.build(symbol, self.base, false));
                self.forming.insert(symbol.to_string(), forming);
            }
        }

        Ok(outcome)
    }

    /// Close the FORMING candle if `now_ms` has crossed its period boundary,
    /// filling any zero-tick gap up to (but not including) `now_ms`'s period.
    /// No new FORMING candle is opened; the next tick opens one.
    pub fn on_period_boundary(&mut self, symbol: &str, now_ms: i64) -> Vec<Candle> {
        let now_period = self.base.period_start(now_ms);
        let mut closed = Vec::new();

        if let Some(forming) = self.forming.get(symbol)
            && forming.open_time < now_period
        {
            let forming = self
                .forming
                .remove(symbol)
                .expect("forming verified to exist by get check");
            let candle = forming.build(symbol, self.base, true);
            self.last_close.insert(symbol.to_string(), candle.close);
            self.last_period.insert(symbol.to_string(), candle.open_time);
            let gap_start = candle.open_time + self.base.to_millis();
            closed.push(candle);
            self.fill_gap(symbol, gap_start, now_period, &mut closed);
        }

        closed
    }

    /// Pass-through ingestion of an already-closed base candle from a broker
    /// feed. Continuity is still enforced: a gap between pushed candles is
    /// filled with synthetic flats, and stale candles are rejected.
    pub fn on_base_candle(&mut self, candle: Candle) -> Result<Vec<Candle>, DataQualityError> {
        if candle.timeframe != self.base {
            return Err(DataQualityError::InvalidTick {
                symbol: candle.symbol.clone(),
                reason: format!(
                    "pushed candle timeframe {} does not match base {}",
                    candle.timeframe, self.base
                ),
            });
        }
        candle.validate()?;

        let symbol = candle.symbol.clone();
        let mut out = Vec::new();

        if let Some(&last) = self.last_period.get(&symbol) {
            if candle.open_time <= last {
                return Err(DataQualityError::OutOfOrderTick {
                    symbol,
                    timestamp: candle.open_time,
                    period_start: last + self.base.to_millis(),
                });
            }
            self.fill_gap(
                &symbol,
                last + self.base.to_millis(),
                candle.open_time,
                &mut out,
            );
        }

        self.last_close.insert(symbol.clone(), candle.close);
        self.last_period.insert(symbol, candle.open_time);

        let mut candle = candle;
        candle.is_closed = true;
        out.push(candle);
        Ok(out)
    }

    /// Prime per-symbol continuity state from the last known closed candle,
    /// so the first live tick after a historical load gap-fills forward from
    /// the warm-up tail instead of starting a fresh series.
    pub fn seed_continuity(&mut self, symbol: &str, last_open_time: i64, last_close: Decimal) {
        self.last_close.insert(symbol.to_string(), last_close);
        self.last_period.insert(symbol.to_string(), last_open_time);
    }

    /// Snapshot of the current FORMING candle, if any
    pub fn forming_candle(&self, symbol: &str) -> Option<Candle> {
        self.forming
            .get(symbol)
            .map(|f| f.build(symbol, self.base, false))
    }

    pub fn clear(&mut self, symbol: Option<&str>) {
        match symbol {
            Some(sym) => {
                self.forming.remove(sym);
                self.last_close.remove(sym);
                self.last_period.remove(sym);
            }
            None => {
                self.forming.clear();
                self.last_close.clear();
                self.last_period.clear();
            }
        }
    }

    /// Synthetic flat candles for every zero-tick period in
    /// `[from_ms, until_ms)`. Requires a previous close for the symbol.
    fn fill_gap(&mut self, symbol: &str, from_ms: i64, until_ms: i64, out: &mut Vec<Candle>) {
        let Some(&flat_price) = self.last_close.get(symbol) else {
            return;
        };

        let period_ms = self.base.to_millis();
        let mut open_time = from_ms;
        while open_time < until_ms {
            out.push(Candle::synthetic_flat(symbol, self.base, open_time, flat_price));
            self.last_period.insert(symbol.to_string(), open_time);
            open_time += period_ms;
        }

        if from_ms < until_ms {
            warn!(
                "CandleBuilder: {} had {} zero-tick period(s), filled flat at {}",
                symbol,
                (until_ms - from_ms) / period_ms,
                flat_price
            );
        }
    }

    fn is_outlier(&self, symbol: &str, price: Decimal) -> bool {
        let Some(max_deviation) = self.max_price_deviation else {
            return false;
        };

        if let Some(forming) = self.forming.get(symbol)
            && forming.trade_count >= MIN_TICKS_FOR_OUTLIER_FILTER
            && forming.close > Decimal::ZERO
        {
            let deviation = ((price - forming.close) / forming.close).abs();
            if deviation > max_deviation {
                return true;
            }
        }

        // Cross-candle protection against bad prints right after a close
        if let Some(&last) = self.last_close.get(symbol)
            && last > Decimal::ZERO
        {
            let deviation = ((price - last) / last).abs();
            if deviation > max_deviation {
                return true;
            }
        }

        false
    }
}
