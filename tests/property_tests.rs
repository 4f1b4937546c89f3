use candlebot::config::ExitConfig;
use candlebot::execution::{CandleAggregator, PositionManager, StrategyEngine};
use candlebot::indicators::{detect_swing_highs, detect_swing_lows};
use candlebot::{AppConfig, Candle, Direction, Signal, TradeEvent};
use chrono::DateTime;
use proptest::prelude::*;
use rust_decimal::Decimal;

const INTERVAL: i64 = 300;

fn price() -> impl Strategy<Value = Decimal> {
    (1_000u32..200_000).prop_map(Decimal::from)
}

fn candles_from(highs: &[u32]) -> Vec<Candle> {
    highs
        .iter()
        .enumerate()
        .map(|(i, &h)| {
            let high = Decimal::from(h);
            Candle::new(
                DateTime::from_timestamp(i as i64 * INTERVAL, 0).unwrap(),
                high - Decimal::from(5),
                high,
                high - Decimal::from(10),
                high - Decimal::from(5),
                Decimal::ONE,
            )
            .unwrap()
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_candle_bounds_hold_within_bucket(
        trades in prop::collection::vec((price(), 0u32..50, any::<bool>(), 0i64..INTERVAL), 1..60)
    ) {
        let mut aggregator = CandleAggregator::new(INTERVAL);
        for (price, size, buy, offset) in &trades {
            let trade = TradeEvent::new(*price, Decimal::from(*size), offset * 1_000_000, *buy);
            prop_assert!(aggregator.on_trade(&trade).unwrap().is_none());
        }

        let candle = aggregator.open_candle().unwrap();
        prop_assert!(candle.low() <= candle.open().min(candle.close()));
        prop_assert!(candle.high() >= candle.open().max(candle.close()));
        prop_assert!(candle.buy_volume() <= candle.volume());
        prop_assert!(candle.buy_volume() >= Decimal::ZERO);
    }

    #[test]
    fn prop_refeeding_sealed_buckets_never_mutates_history(
        prices in prop::collection::vec(price(), 4..40),
        replay_from in 0usize..4,
    ) {
        let config = AppConfig::default().with_interval("5m").unwrap();
        let mut engine = StrategyEngine::new(&config).unwrap();
        let trades: Vec<TradeEvent> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| TradeEvent::new(*p, Decimal::ONE, i as i64 * INTERVAL * 1_000_000, i % 2 == 0))
            .collect();

        for trade in &trades {
            engine.on_trade(trade);
        }
        let history = engine.series().as_slice().to_vec();

        // every trade before the open bucket is stale now
        for trade in &trades[replay_from..trades.len() - 1] {
            engine.on_trade(trade);
        }
        prop_assert_eq!(engine.series().as_slice(), history.as_slice());
    }

    #[test]
    fn prop_swings_stable_when_appending(
        highs in prop::collection::vec(1_000u32..1_100, 10..60),
        extra in prop::collection::vec(1_000u32..1_100, 1..20),
        lookback in 1usize..4,
    ) {
        let prefix = candles_from(&highs);
        let mut all_highs = highs.clone();
        all_highs.extend(&extra);
        let extended = candles_from(&all_highs);

        let before_highs = detect_swing_highs(&prefix, lookback);
        let after_highs: Vec<_> = detect_swing_highs(&extended, lookback)
            .into_iter()
            .filter(|s| s.index + lookback < prefix.len())
            .collect();
        prop_assert_eq!(before_highs, after_highs);

        let before_lows = detect_swing_lows(&prefix, lookback);
        let after_lows: Vec<_> = detect_swing_lows(&extended, lookback)
            .into_iter()
            .filter(|s| s.index + lookback < prefix.len())
            .collect();
        prop_assert_eq!(before_lows, after_lows);
    }

    #[test]
    fn prop_trailing_stop_is_monotonic(
        long in any::<bool>(),
        path in prop::collection::vec(-300i64..300, 1..80),
    ) {
        let entry = Decimal::from(90_000);
        let risk = Decimal::from(500);
        let direction = if long { Direction::Long } else { Direction::Short };
        let signal = Signal {
            direction,
            entry_price: entry,
            stop_loss: entry - direction.sign() * risk,
            target: None,
            reason: "prop".to_string(),
            candle_time: DateTime::from_timestamp(0, 0).unwrap(),
        };

        let mut manager = PositionManager::new(ExitConfig::default());
        prop_assert!(manager.begin_entry(signal));
        let opened = DateTime::from_timestamp(0, 0).unwrap();
        manager.confirm_entry(None, opened);

        let mut price = entry;
        let mut last_stop = manager.position().unwrap().stop_loss;
        for (i, step) in path.iter().enumerate() {
            price += Decimal::from(*step);
            let at = DateTime::from_timestamp(i as i64 + 1, 0).unwrap();
            manager.on_tick(price, at, &[]);

            let Some(position) = manager.position() else { break };
            let tightened = (position.stop_loss - last_stop) * direction.sign();
            prop_assert!(tightened >= Decimal::ZERO);
            last_stop = position.stop_loss;
        }
    }
}
