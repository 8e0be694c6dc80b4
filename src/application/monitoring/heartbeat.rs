use crate::application::market_data::engine::AggregationEngine;
use crate::config::ObservabilityEnvConfig;
use crate::domain::market::events::MarketDataEvent;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Periodic status publisher, independent of the tick-driven pipeline.
///
/// On every interval it reads the engine's aggregate counters and publishes
/// one global HEARTBEAT plus one per active (symbol, timeframe) series. It
/// also warns about symbols whose tick stream has gone silent. Failures
/// here never block candle processing; the task owns no pipeline state.
pub struct HeartbeatMonitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Spawn the background heartbeat task
    pub fn spawn(engine: Arc<AggregationEngine>, config: ObservabilityEnvConfig) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval_secs = config.heartbeat_interval_seconds.max(1);
        let silence_ms = (config.silence_warning_seconds * 1000) as i64;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        Self::beat(&engine, silence_ms).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("HeartbeatMonitor: stopped");
        });

        Self { shutdown, handle }
    }

    async fn beat(engine: &AggregationEngine, silence_ms: i64) {
        let snapshot = engine.heartbeat_snapshot().await;

        // Zombie-stream detection: a symbol with buffered data but no
        // recent ticks is worth flagging before its series go stale
        let now_ms = Utc::now().timestamp_millis();
        for (symbol, &last_ms) in &snapshot.last_tick_times {
            if now_ms - last_ms > silence_ms {
                warn!(
                    "HeartbeatMonitor: {} silent for {}s",
                    symbol,
                    (now_ms - last_ms) / 1000
                );
            }
        }

        engine
            .bus()
            .publish(&MarketDataEvent::Heartbeat {
                symbol: None,
                timeframe: None,
                snapshot: snapshot.clone(),
            })
            .await;

        for key in engine.active_series().await {
            engine
                .bus()
                .publish(&MarketDataEvent::Heartbeat {
                    symbol: Some(key.symbol),
                    timeframe: Some(key.timeframe),
                    snapshot: snapshot.clone(),
                })
                .await;
        }
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::market::events::EventType;
    use crate::infrastructure::event_bus::EventBus;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1704067200000;

    #[tokio::test]
    async fn test_heartbeat_publishes_global_and_per_series() {
        let mut config = Config::default();
        config.observability.heartbeat_interval_seconds = 1;
        let engine = Arc::new(AggregationEngine::new(config.clone(), EventBus::new()).unwrap());

        // Two closed 1m candles for one symbol
        for i in 0..3 {
            engine
                .on_tick("BTC/USD", dec!(100), dec!(1), T0 + i * 60_000)
                .await;
        }

        let global = Arc::new(AtomicUsize::new(0));
        let scoped = Arc::new(AtomicUsize::new(0));
        {
            let global = Arc::clone(&global);
            let scoped = Arc::clone(&scoped);
            engine
                .bus()
                .subscribe(
                    EventType::Heartbeat,
                    "*",
                    "*",
                    Arc::new(move |event: &MarketDataEvent| -> anyhow::Result<()> {
                        if event.symbol().is_none() {
                            global.fetch_add(1, Ordering::SeqCst);
                        } else {
                            scoped.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(())
                    }),
                )
                .await
                .unwrap();
        }

        let monitor = HeartbeatMonitor::spawn(Arc::clone(&engine), config.observability);
        // The first interval tick fires immediately
        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.shutdown().await;

        assert!(global.load(Ordering::SeqCst) >= 1);
        // One active series (BTC/USD @ 1m)
        assert!(scoped.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let config = Config::default();
        let engine = Arc::new(AggregationEngine::new(config.clone(), EventBus::new()).unwrap());
        let monitor = HeartbeatMonitor::spawn(engine, config.observability);
        monitor.shutdown().await;
    }
}
