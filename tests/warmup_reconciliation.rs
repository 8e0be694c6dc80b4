use candlegrid::application::market_data::engine::{AggregationEngine, SymbolLifecycle};
use candlegrid::application::warmup::WarmupCoordinator;
use candlegrid::config::Config;
use candlegrid::domain::market::events::{EventType, MarketDataEvent};
use candlegrid::domain::market::timeframe::Timeframe;
use candlegrid::infrastructure::event_bus::EventBus;
use candlegrid::infrastructure::mock::MockHistoryProvider;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const ANCHOR: i64 = 1704153600000; // 2024-01-02 00:00:00 UTC
const MIN: i64 = 60_000;

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_engine() -> Arc<AggregationEngine> {
    let mut config = Config::default();
    config.aggregation.derived_timeframes = vec![Timeframe::FiveMin];
    config
        .warmup
        .required_candles
        .insert(Timeframe::OneMin, 100);
    config
        .warmup
        .required_candles
        .insert(Timeframe::FiveMin, 20);
    Arc::new(AggregationEngine::new(config, EventBus::new()).unwrap())
}

#[tokio::test]
async fn warmup_publishes_complete_ordered_history_before_live() {
    init_logging();

    let engine = build_engine();
    let provider = Arc::new(MockHistoryProvider::new(68000.0, ANCHOR, 9));
    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), provider);

    // Record every CANDLE_CLOSED the strategy would see, in arrival order
    let seen: Arc<Mutex<Vec<(Timeframe, i64)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        engine
            .bus()
            .subscribe(
                EventType::CandleClosed,
                "BTC/USD",
                "*",
                Arc::new(move |event: &MarketDataEvent| -> anyhow::Result<()> {
                    if let MarketDataEvent::CandleClosed { candle, .. } = event {
                        seen.lock().unwrap().push((candle.timeframe, candle.open_time));
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }

    coordinator.warmup_symbol("BTC/USD").await.unwrap();

    // Completeness: the full tail is queryable for every timeframe
    let one_min = engine.get_lookback("BTC/USD", Timeframe::OneMin, 100).await;
    let five_min = engine.get_lookback("BTC/USD", Timeframe::FiveMin, 20).await;
    assert_eq!(one_min.len(), 100);
    assert_eq!(five_min.len(), 20);
    for pair in one_min.windows(2) {
        assert!(pair[0].open_time < pair[1].open_time);
    }
    for pair in five_min.windows(2) {
        assert!(pair[0].open_time < pair[1].open_time);
    }

    // The subscriber saw the entire tail: 100 base + 20 derived candles
    let events = seen.lock().unwrap().clone();
    assert_eq!(events.len(), 120);

    // Merged stream is ascending by open_time, base before derived on ties
    for pair in events.windows(2) {
        let (tf_a, t_a) = pair[0];
        let (tf_b, t_b) = pair[1];
        assert!(
            t_a < t_b || (t_a == t_b && tf_a.to_minutes() <= tf_b.to_minutes()),
            "history published out of order: {:?} then {:?}",
            pair[0],
            pair[1]
        );
    }

    // The symbol is LIVE and the warm-up state reads complete
    assert_eq!(
        engine.lifecycle("BTC/USD").await,
        Some(SymbolLifecycle::Live)
    );
    let status = coordinator.warmup_state("BTC/USD").await;
    assert!(status.completed);
    assert_eq!(status.timeframes[&Timeframe::OneMin].received_count, 100);
    assert_eq!(status.timeframes[&Timeframe::FiveMin].received_count, 20);

    // Live ticks now extend the same series without gaps or reordering
    engine.on_tick("BTC/USD", dec!(68000), dec!(1), ANCHOR).await;
    engine
        .on_tick("BTC/USD", dec!(68010), dec!(1), ANCHOR + MIN)
        .await;

    let events = seen.lock().unwrap().clone();
    assert_eq!(events.len(), 121);
    let (tf, open_time) = *events.last().unwrap();
    assert_eq!(tf, Timeframe::OneMin);
    assert_eq!(open_time, ANCHOR);

    let latest = engine.get_latest("BTC/USD", Timeframe::OneMin).await.unwrap();
    assert_eq!(latest.open_time, ANCHOR);
    assert_eq!(latest.close, dec!(68000));
}

#[tokio::test]
async fn ticks_during_warmup_are_dropped_and_live_after() {
    init_logging();

    let engine = build_engine();

    engine.register_warming("BTC/USD").await;
    engine.on_tick("BTC/USD", dec!(68000), dec!(1), ANCHOR).await;
    assert!(engine.get_latest("BTC/USD", Timeframe::OneMin).await.is_none());
    assert_eq!(engine.metrics().ticks_rejected_warming_total.get(), 1);

    // An unregistered symbol is live from its first tick
    engine.on_tick("SOL/USD", dec!(150), dec!(1), ANCHOR).await;
    assert_eq!(engine.metrics().ticks_total.get(), 1);
}

#[tokio::test]
async fn short_history_leaves_symbol_warming_with_partial_state() {
    init_logging();

    let engine = build_engine();
    // 100 base candles required, provider only has 37
    let provider = Arc::new(MockHistoryProvider::new(68000.0, ANCHOR, 9).with_available(37));
    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), provider);

    let failures = coordinator.warmup_all(&["BTC/USD"]).await;
    assert_eq!(failures.len(), 1);

    let status = coordinator.warmup_state("BTC/USD").await;
    assert!(!status.completed);
    assert_eq!(status.timeframes[&Timeframe::OneMin].received_count, 37);
    assert!(!status.timeframes[&Timeframe::OneMin].completed);

    assert_eq!(
        engine.lifecycle("BTC/USD").await,
        Some(SymbolLifecycle::WarmingUp)
    );

    // Nothing was published: the subscriber contract is all-or-nothing
    let count = Arc::new(AtomicUsize::new(0));
    {
        let count = Arc::clone(&count);
        engine
            .bus()
            .subscribe(
                EventType::CandleClosed,
                "BTC/USD",
                "*",
                Arc::new(move |_: &MarketDataEvent| -> anyhow::Result<()> {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }
    engine.on_tick("BTC/USD", dec!(68000), dec!(1), ANCHOR).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn late_first_live_tick_gap_fills_from_warmup_tail() {
    init_logging();

    let engine = build_engine();
    let provider = Arc::new(MockHistoryProvider::new(68000.0, ANCHOR, 9));
    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), provider);
    coordinator.warmup_symbol("BTC/USD").await.unwrap();

    let tail = engine.get_latest("BTC/USD", Timeframe::OneMin).await.unwrap();
    assert_eq!(tail.open_time, ANCHOR - MIN);

    // First live tick lands three periods after the historical tail
    engine
        .on_tick("BTC/USD", dec!(68100), dec!(1), ANCHOR + 2 * MIN)
        .await;

    // The two skipped periods were flat-filled from the tail's close
    let lookback = engine.get_lookback("BTC/USD", Timeframe::OneMin, 3).await;
    assert_eq!(lookback.len(), 3);
    assert_eq!(lookback[1].open_time, ANCHOR);
    assert_eq!(lookback[1].close, tail.close);
    assert_eq!(lookback[1].volume, rust_decimal::Decimal::ZERO);
    assert_eq!(lookback[2].open_time, ANCHOR + MIN);
    assert_eq!(lookback[2].close, tail.close);
}

struct StalledProvider;

#[async_trait::async_trait]
impl candlegrid::domain::ports::HistoricalDataProvider for StalledProvider {
    async fn fetch_historical(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _count: usize,
    ) -> anyhow::Result<Vec<candlegrid::domain::market::candle::Candle>> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn stalled_provider_times_out_with_alert_event() {
    init_logging();

    let mut config = Config::default();
    config.aggregation.derived_timeframes = vec![Timeframe::FiveMin];
    config.warmup.timeout_seconds = 1;
    let engine = Arc::new(AggregationEngine::new(config, EventBus::new()).unwrap());

    let timeouts = Arc::new(AtomicUsize::new(0));
    {
        let timeouts = Arc::clone(&timeouts);
        engine
            .bus()
            .subscribe(
                EventType::WarmupTimeout,
                "BTC/USD",
                "*",
                Arc::new(move |event: &MarketDataEvent| -> anyhow::Result<()> {
                    if let MarketDataEvent::WarmupTimeout { elapsed_secs, .. } = event {
                        assert!(*elapsed_secs >= 1);
                        timeouts.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }

    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), Arc::new(StalledProvider));
    let err = coordinator.warmup_symbol("BTC/USD").await.unwrap_err();
    assert!(matches!(
        err,
        candlegrid::domain::errors::WarmupError::Timeout { .. }
    ));

    // Non-fatal: the alert fired and the symbol stays WARMING_UP
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(
        engine.lifecycle("BTC/USD").await,
        Some(SymbolLifecycle::WarmingUp)
    );
}

#[tokio::test]
async fn warmup_retry_after_short_history_succeeds_cleanly() {
    init_logging();

    let engine = build_engine();

    // First attempt against a truncated provider fails
    let short = Arc::new(MockHistoryProvider::new(68000.0, ANCHOR, 9).with_available(10));
    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), short);
    assert!(coordinator.warmup_symbol("BTC/USD").await.is_err());

    // Retry with full history: the idempotent re-run starts from scratch
    let full = Arc::new(MockHistoryProvider::new(68000.0, ANCHOR, 9));
    let coordinator = WarmupCoordinator::new(Arc::clone(&engine), full);
    coordinator.warmup_symbol("BTC/USD").await.unwrap();

    assert_eq!(
        engine.get_lookback("BTC/USD", Timeframe::OneMin, 100).await.len(),
        100
    );
    assert_eq!(
        engine.lifecycle("BTC/USD").await,
        Some(SymbolLifecycle::Live)
    );
}
