pub mod market_data;
pub mod monitoring;
pub mod warmup;
