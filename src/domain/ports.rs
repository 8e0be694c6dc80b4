use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use anyhow::Result;
use async_trait::async_trait;

// Need async_trait for async functions in traits
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync {
    /// Fetch up to `count` closed candles for the symbol at the given
    /// timeframe, in ascending `open_time` order. Fewer candles than
    /// requested is not an error; the caller decides completeness.
    async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;
}
