use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::HistoricalDataProvider;
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Mutex;
use tracing::info;

/// Seeded random-walk history provider for tests and broker-free embedding.
///
/// Generates closed base candles ending at a fixed anchor time, ascending by
/// `open_time`. The same seed always produces the same series.
pub struct MockHistoryProvider {
    start_price: f64,
    /// Per-candle relative price step bound (e.g. 0.002 = 0.2%)
    volatility: f64,
    /// Period end of the most recent candle, UTC ms
    anchor_ms: i64,
    /// Caps how many candles the provider "has", regardless of the request.
    /// Used to simulate short history.
    available: Option<usize>,
    rng: Mutex<StdRng>,
}

impl MockHistoryProvider {
    pub fn new(start_price: f64, anchor_ms: i64, seed: u64) -> Self {
        Self {
            start_price,
            volatility: 0.002,
            anchor_ms,
            available: None,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Limit the history depth the provider will return
    pub fn with_available(mut self, count: usize) -> Self {
        self.available = Some(count);
        self
    }
}

#[async_trait]
impl HistoricalDataProvider for MockHistoryProvider {
    async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let count = match self.available {
            Some(available) => count.min(available),
            None => count,
        };

        let period_ms = timeframe.to_millis();
        let first_open = timeframe.period_start(self.anchor_ms) - (count as i64) * period_ms;

        let mut rng = self.rng.lock().expect("mock rng lock poisoned");
        let mut price = self.start_price;
        let mut candles = Vec::with_capacity(count);

        for i in 0..count {
            let open = price;
            let step = |rng: &mut StdRng, p: f64, vol: f64| p * (1.0 + rng.random_range(-vol..vol));
            let a = step(&mut rng, open, self.volatility);
            let b = step(&mut rng, open, self.volatility);
            let close = step(&mut rng, open, self.volatility);
            let high = open.max(a).max(b).max(close);
            let low = open.min(a).min(b).min(close);
            let volume = rng.random_range(1.0..50.0);
            price = close;

            let dec = |v: f64| Decimal::from_f64(v).unwrap_or_default().round_dp(8);
            let close_dec = dec(close);
            candles.push(Candle {
                symbol: symbol.to_string(),
                timeframe,
                open_time: first_open + (i as i64) * period_ms,
                open: dec(open),
                high: dec(high),
                low: dec(low),
                close: close_dec,
                volume: dec(volume),
                vwap: dec((high + low + close) / 3.0),
                trade_count: rng.random_range(1..200),
                is_closed: true,
            });
        }

        info!(
            "MockHistoryProvider: generated {} {} candles for {}",
            candles.len(),
            timeframe,
            symbol
        );

        Ok(candles)
    }
}
