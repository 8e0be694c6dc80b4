use candlegrid::application::market_data::engine::AggregationEngine;
use candlegrid::config::Config;
use candlegrid::domain::market::events::{EventType, MarketDataEvent};
use candlegrid::domain::market::timeframe::Timeframe;
use candlegrid::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const T0: i64 = 1704067200000; // 2024-01-01 00:00:00 UTC
const MIN: i64 = 60_000;

fn build_engine() -> Arc<AggregationEngine> {
    let mut config = Config::default();
    config.aggregation.derived_timeframes = vec![Timeframe::FiveMin];
    Arc::new(AggregationEngine::new(config, EventBus::new()).unwrap())
}

async fn feed_minute(engine: &AggregationEngine, symbol: &str, minute: i64, prices: &[Decimal]) {
    let step = MIN / (prices.len() as i64 + 1);
    for (i, &price) in prices.iter().enumerate() {
        engine
            .on_tick(symbol, price, dec!(1), T0 + minute * MIN + (i as i64) * step)
            .await;
    }
}

#[tokio::test]
async fn tick_scenario_produces_expected_ohlc() {
    let engine = build_engine();

    // Prices 100, 102, 101, 105 within one minute
    feed_minute(&engine, "BTC/USD", 0, &[dec!(100), dec!(102), dec!(101), dec!(105)]).await;
    // A tick in the next minute closes it
    engine.on_tick("BTC/USD", dec!(104), dec!(1), T0 + MIN).await;

    let candle = engine.get_latest("BTC/USD", Timeframe::OneMin).await.unwrap();
    assert_eq!(candle.open, dec!(100));
    assert_eq!(candle.high, dec!(105));
    assert_eq!(candle.low, dec!(100));
    assert_eq!(candle.close, dec!(105));
    assert_eq!(candle.volume, dec!(4));
    assert_eq!(candle.trade_count, 4);
}

#[tokio::test]
async fn five_minutes_resample_to_hand_computed_aggregate() {
    let engine = build_engine();

    // Five minutes with known extrema: the 5m candle must be
    // {first open, max high, min low, last close, summed volume}
    let minutes: [&[Decimal]; 5] = [
        &[dec!(100), dec!(102)],
        &[dec!(101), dec!(99)],
        &[dec!(98), dec!(103)],
        &[dec!(104), dec!(108)],
        &[dec!(107), dec!(105)],
    ];
    for (minute, prices) in minutes.iter().enumerate() {
        feed_minute(&engine, "BTC/USD", minute as i64, prices).await;
    }
    // Close the fifth minute (and with it the 5m span)
    engine.on_tick("BTC/USD", dec!(106), dec!(1), T0 + 5 * MIN).await;

    let five = engine.get_latest("BTC/USD", Timeframe::FiveMin).await.unwrap();
    assert_eq!(five.open_time, T0);
    assert_eq!(five.open, dec!(100)); // first minute's open
    assert_eq!(five.high, dec!(108)); // minute 3's high
    assert_eq!(five.low, dec!(98)); // minute 2's low
    assert_eq!(five.close, dec!(105)); // last minute's close
    assert_eq!(five.volume, dec!(10)); // 5 minutes x 2 ticks x 1.0
    assert_eq!(five.trade_count, 10);
    assert!(five.is_closed);

    // And the base series holds all five closed minutes
    assert_eq!(engine.get_lookback("BTC/USD", Timeframe::OneMin, 10).await.len(), 5);
}

#[tokio::test]
async fn zero_tick_minute_yields_synthetic_flat_candle() {
    let engine = build_engine();

    // Ticks in minute 0 and minute 2, nothing in minute 1
    feed_minute(&engine, "BTC/USD", 0, &[dec!(100), dec!(102)]).await;
    engine.on_tick("BTC/USD", dec!(103), dec!(1), T0 + 2 * MIN).await;

    let lookback = engine.get_lookback("BTC/USD", Timeframe::OneMin, 10).await;
    assert_eq!(lookback.len(), 2);

    let flat = &lookback[1];
    assert_eq!(flat.open_time, T0 + MIN);
    assert_eq!(flat.open, dec!(102));
    assert_eq!(flat.high, dec!(102));
    assert_eq!(flat.low, dec!(102));
    assert_eq!(flat.close, dec!(102));
    assert_eq!(flat.volume, Decimal::ZERO);
    assert_eq!(flat.trade_count, 0);
    assert!(flat.is_closed);
}

#[tokio::test]
async fn wildcard_subscriptions_fan_out_across_symbols() {
    let engine = build_engine();

    // ('CANDLE_CLOSED', '*', '1m'): every symbol at 1m, nothing at 5m
    let any_symbol_1m = Arc::new(AtomicUsize::new(0));
    {
        let count = Arc::clone(&any_symbol_1m);
        engine
            .bus()
            .subscribe(
                EventType::CandleClosed,
                "*",
                "1m",
                Arc::new(move |_: &MarketDataEvent| -> anyhow::Result<()> {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }

    // ('CANDLE_CLOSED', 'BTC/USD', '*'): BTC at every timeframe
    let btc_any_tf: Arc<Mutex<Vec<Timeframe>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&btc_any_tf);
        engine
            .bus()
            .subscribe(
                EventType::CandleClosed,
                "BTC/USD",
                "*",
                Arc::new(move |event: &MarketDataEvent| -> anyhow::Result<()> {
                    if let MarketDataEvent::CandleClosed { candle, .. } = event {
                        if candle.symbol == "BTC/USD" {
                            seen.lock().unwrap().push(candle.timeframe);
                        }
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }

    // Six minutes for two symbols: 5 closed 1m candles each, one 5m each
    for i in 0..6 {
        engine.on_tick("BTC/USD", dec!(100), dec!(1), T0 + i * MIN).await;
        engine.on_tick("ETH/USD", dec!(3500), dec!(1), T0 + i * MIN).await;
    }

    // 5 BTC + 5 ETH closed 1m candles; the two 5m closes did not match
    assert_eq!(any_symbol_1m.load(Ordering::SeqCst), 10);

    // BTC subscriber saw both timeframes, never ETH
    let timeframes = btc_any_tf.lock().unwrap().clone();
    assert_eq!(timeframes.len(), 6);
    assert_eq!(
        timeframes
            .iter()
            .filter(|tf| **tf == Timeframe::FiveMin)
            .count(),
        1
    );
}

#[tokio::test]
async fn forming_candles_announce_new_periods() {
    let engine = build_engine();

    let opened: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let opened = Arc::clone(&opened);
        engine
            .bus()
            .subscribe(
                EventType::NewCandle,
                "BTC/USD",
                "1m",
                Arc::new(move |event: &MarketDataEvent| -> anyhow::Result<()> {
                    if let MarketDataEvent::NewCandle { candle, .. } = event {
                        assert!(!candle.is_closed);
                        opened.lock().unwrap().push(candle.open_time);
                    }
                    Ok(())
                }),
            )
            .await
            .unwrap();
    }

    engine.on_tick("BTC/USD", dec!(100), dec!(1), T0).await;
    engine.on_tick("BTC/USD", dec!(101), dec!(1), T0 + 30_000).await;
    engine.on_tick("BTC/USD", dec!(102), dec!(1), T0 + MIN).await;

    // One NEW_CANDLE per opened period: minute 0 and minute 1
    assert_eq!(*opened.lock().unwrap(), vec![T0, T0 + MIN]);
}

#[tokio::test]
async fn eviction_keeps_only_newest_candles() {
    let mut config = Config::default();
    config.aggregation.derived_timeframes = vec![Timeframe::FiveMin];
    config.aggregation.buffer_capacity = 10;
    let engine = Arc::new(AggregationEngine::new(config, EventBus::new()).unwrap());

    // 16 minutes of ticks: 15 closed 1m candles against capacity 10
    for i in 0..16 {
        engine.on_tick("BTC/USD", dec!(100), dec!(1), T0 + i * MIN).await;
    }

    let lookback = engine.get_lookback("BTC/USD", Timeframe::OneMin, 100).await;
    assert_eq!(lookback.len(), 10);
    assert_eq!(lookback.first().unwrap().open_time, T0 + 5 * MIN);
    assert_eq!(lookback.last().unwrap().open_time, T0 + 14 * MIN);
}
