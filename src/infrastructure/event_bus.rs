use crate::domain::errors::DispatchError;
use crate::domain::market::events::{EventType, MarketDataEvent};
use crate::domain::market::timeframe::Timeframe;
use crate::infrastructure::metrics::Metrics;
use anyhow::Result;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

pub type SubscriptionId = Uuid;

/// Callback invoked for every published event matching a subscription's
/// topic. Handlers run synchronously on the publisher's task and must be
/// bounded-time; a handler that needs to block should hand the event off to
/// its own queue.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &MarketDataEvent) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&MarketDataEvent) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &MarketDataEvent) -> Result<()> {
        self(event)
    }
}

/// Exact value or `*` for the symbol position of a topic
#[derive(Debug, Clone, PartialEq, Eq)]
enum SymbolPattern {
    Any,
    Exact(String),
}

impl SymbolPattern {
    fn parse(raw: &str) -> Self {
        if raw == "*" {
            SymbolPattern::Any
        } else {
            SymbolPattern::Exact(raw.to_string())
        }
    }

    fn matches(&self, symbol: Option<&str>) -> bool {
        match self {
            SymbolPattern::Any => true,
            SymbolPattern::Exact(expected) => symbol == Some(expected.as_str()),
        }
    }
}

/// Exact timeframe or `*` for the timeframe position of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeframePattern {
    Any,
    Exact(Timeframe),
}

impl TimeframePattern {
    fn parse(raw: &str) -> Result<Self> {
        if raw == "*" {
            Ok(TimeframePattern::Any)
        } else {
            Ok(TimeframePattern::Exact(Timeframe::from_str(raw)?))
        }
    }

    fn matches(&self, timeframe: Option<Timeframe>) -> bool {
        match self {
            TimeframePattern::Any => true,
            TimeframePattern::Exact(expected) => timeframe == Some(*expected),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    name: String,
    event_type: EventType,
    symbol: SymbolPattern,
    timeframe: TimeframePattern,
    handler: Arc<dyn EventHandler>,
}

/// Typed publish/subscribe bus with topic filtering.
///
/// Topics are `(event_type, symbol, timeframe)`; `*` matches any value in
/// its position. All matching subscriptions fire for every published event,
/// in registration order. The subscription table is the only structure
/// mutated from multiple call sites and is serialized behind an async lock;
/// dispatch itself snapshots the matching handlers first, so handlers may
/// subscribe or unsubscribe reentrantly.
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    metrics: Arc<OnceLock<Metrics>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(OnceLock::new()),
        }
    }

    /// Attach a metrics handle for dispatch-error accounting. First caller
    /// wins; the engine does this when it takes ownership of the bus.
    pub fn attach_metrics(&self, metrics: Metrics) {
        let _ = self.metrics.set(metrics);
    }

    /// Register a handler for a topic. `symbol_pattern` and
    /// `timeframe_pattern` are exact values or `*`.
    pub async fn subscribe(
        &self,
        event_type: EventType,
        symbol_pattern: &str,
        timeframe_pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let id = Uuid::new_v4();
        let name = format!("sub-{}", &id.to_string()[..8]);
        self.subscribe_inner(id, name, event_type, symbol_pattern, timeframe_pattern, handler)
            .await
    }

    /// Like [`subscribe`](Self::subscribe) but with a caller-supplied name
    /// used in dispatch-error logs.
    pub async fn subscribe_named(
        &self,
        name: &str,
        event_type: EventType,
        symbol_pattern: &str,
        timeframe_pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let id = Uuid::new_v4();
        self.subscribe_inner(
            id,
            name.to_string(),
            event_type,
            symbol_pattern,
            timeframe_pattern,
            handler,
        )
        .await
    }

    async fn subscribe_inner(
        &self,
        id: SubscriptionId,
        name: String,
        event_type: EventType,
        symbol_pattern: &str,
        timeframe_pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<SubscriptionId> {
        let subscription = Subscription {
            id,
            name,
            event_type,
            symbol: SymbolPattern::parse(symbol_pattern),
            timeframe: TimeframePattern::parse(timeframe_pattern)?,
            handler,
        };

        debug!(
            "EventBus: subscribed {} to ({}, {}, {})",
            subscription.name, event_type, symbol_pattern, timeframe_pattern
        );

        self.subscriptions.write().await.push(subscription);
        Ok(id)
    }

    /// Remove a subscription by identity. Returns false if the id was not
    /// registered (already removed or never existed).
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Publish an event to every matching subscription.
    ///
    /// Handler failures are caught per handler, logged with the topic and
    /// handler identity, and never interrupt delivery to the remaining
    /// subscribers.
    pub async fn publish(&self, event: &MarketDataEvent) {
        let matching: Vec<(String, Arc<dyn EventHandler>)> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|s| {
                    s.event_type == event.event_type()
                        && s.symbol.matches(event.symbol())
                        && s.timeframe.matches(event.timeframe())
                })
                .map(|s| (s.name.clone(), Arc::clone(&s.handler)))
                .collect()
        };

        for (name, handler) in matching {
            if let Err(e) = handler.on_event(event) {
                let dispatch_error = DispatchError {
                    event_type: event.event_type().to_string(),
                    topic: format!(
                        "({}, {}, {})",
                        event.event_type(),
                        event.symbol().unwrap_or("*"),
                        event
                            .timeframe()
                            .map(|tf| tf.to_string())
                            .unwrap_or_else(|| "*".to_string())
                    ),
                    handler: name,
                    reason: e.to_string(),
                };
                error!("EventBus: {}", dispatch_error);
                if let Some(metrics) = self.metrics.get() {
                    metrics.dispatch_errors_total.inc();
                }
            }
        }
    }

    /// Get count of subscriptions (for testing)
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
