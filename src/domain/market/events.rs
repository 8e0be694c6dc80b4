use crate::domain::market::candle::Candle;
use crate::domain::market::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Event types dispatched through the market-data event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    NewCandle,
    CandleClosed,
    PriceAlert,
    VolumeAlert,
    PatternDetected,
    Heartbeat,
    WarmupTimeout,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::NewCandle => "NEW_CANDLE",
            EventType::CandleClosed => "CANDLE_CLOSED",
            EventType::PriceAlert => "PRICE_ALERT",
            EventType::VolumeAlert => "VOLUME_ALERT",
            EventType::PatternDetected => "PATTERN_DETECTED",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::WarmupTimeout => "WARMUP_TIMEOUT",
        };
        write!(f, "{}", s)
    }
}

/// Periodic status snapshot carried by HEARTBEAT events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tick_count: u64,
    pub candle_count: u64,
    pub active_symbols: Vec<String>,
    pub active_timeframes: Vec<Timeframe>,
    /// Last tick timestamp (UTC ms) per symbol
    pub last_tick_times: HashMap<String, i64>,
}

/// Events published by the aggregation pipeline and its consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketDataEvent {
    /// A new FORMING candle opened for a period (payload not yet closed)
    NewCandle {
        candle: Candle,
        additional_data: Option<serde_json::Value>,
    },
    /// A candle closed and was appended to its series buffer
    CandleClosed {
        candle: Candle,
        additional_data: Option<serde_json::Value>,
    },
    PriceAlert {
        symbol: String,
        timeframe: Timeframe,
        trigger_data: serde_json::Value,
        candle: Option<Candle>,
    },
    VolumeAlert {
        symbol: String,
        timeframe: Timeframe,
        trigger_data: serde_json::Value,
        candle: Option<Candle>,
    },
    PatternDetected {
        symbol: String,
        timeframe: Timeframe,
        trigger_data: serde_json::Value,
        candle: Option<Candle>,
    },
    /// Global (`symbol: None`) or per-series heartbeat
    Heartbeat {
        symbol: Option<String>,
        timeframe: Option<Timeframe>,
        snapshot: HeartbeatSnapshot,
    },
    /// Warm-up exceeded its configured timeout; the symbol stays WARMING_UP
    WarmupTimeout { symbol: String, elapsed_secs: u64 },
}

impl MarketDataEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            MarketDataEvent::NewCandle { .. } => EventType::NewCandle,
            MarketDataEvent::CandleClosed { .. } => EventType::CandleClosed,
            MarketDataEvent::PriceAlert { .. } => EventType::PriceAlert,
            MarketDataEvent::VolumeAlert { .. } => EventType::VolumeAlert,
            MarketDataEvent::PatternDetected { .. } => EventType::PatternDetected,
            MarketDataEvent::Heartbeat { .. } => EventType::Heartbeat,
            MarketDataEvent::WarmupTimeout { .. } => EventType::WarmupTimeout,
        }
    }

    /// The symbol this event is scoped to, if any (global heartbeats have none)
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketDataEvent::NewCandle { candle, .. }
            | MarketDataEvent::CandleClosed { candle, .. } => Some(&candle.symbol),
            MarketDataEvent::PriceAlert { symbol, .. }
            | MarketDataEvent::VolumeAlert { symbol, .. }
            | MarketDataEvent::PatternDetected { symbol, .. }
            | MarketDataEvent::WarmupTimeout { symbol, .. } => Some(symbol),
            MarketDataEvent::Heartbeat { symbol, .. } => symbol.as_deref(),
        }
    }

    /// The timeframe this event is scoped to, if any
    pub fn timeframe(&self) -> Option<Timeframe> {
        match self {
            MarketDataEvent::NewCandle { candle, .. }
            | MarketDataEvent::CandleClosed { candle, .. } => Some(candle.timeframe),
            MarketDataEvent::PriceAlert { timeframe, .. }
            | MarketDataEvent::VolumeAlert { timeframe, .. }
            | MarketDataEvent::PatternDetected { timeframe, .. } => Some(*timeframe),
            MarketDataEvent::Heartbeat { timeframe, .. } => *timeframe,
            MarketDataEvent::WarmupTimeout { .. } => None,
        }
    }
}
