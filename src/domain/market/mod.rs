// Candle and series types
pub mod candle;

// Bus event types and payloads
pub mod events;

// Timeframe and alignment arithmetic
pub mod timeframe;
