use chrono::{DateTime, Utc};

use crate::config::AppConfig;
use crate::error::Error;
use crate::execution::aggregator::CandleAggregator;
use crate::execution::candle_buffer::CandleSeries;
use crate::execution::executor::OrderAck;
use crate::execution::position_manager::{Position, PositionEvent, PositionManager, PositionState, TrailAdvance};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::models::{Candle, ClosedPosition, Signal, TradeEvent};
use crate::strategy::{build_strategy, Strategy};
use crate::Result;

/// Sealed candles the delta-reversal exit looks back over
const RECENT_CANDLES: usize = 2;

/// Something the driver has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    CandleSealed(Candle),
    /// An entry order should be placed; the engine is PENDING until `on_order_result`
    EntryRequested(Signal),
    PositionOpened(Position),
    TrailAdvanced(TrailAdvance),
    /// The position is FLAT again; the driver flattens it on the exchange and records it
    PositionClosed(ClosedPosition),
}

/// One strategy instance on one interval
///
/// Owns the whole per-instance pipeline and is driven synchronously, one event at a time.
pub struct StrategyEngine {
    label: String,
    aggregator: CandleAggregator,
    series: CandleSeries,
    indicators: IndicatorEngine,
    strategy: Box<dyn Strategy>,
    positions: PositionManager,
    snapshot: IndicatorSnapshot,
    last_seen: Option<DateTime<Utc>>,
}

impl StrategyEngine {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let interval_secs = config.interval_secs()?;
        Ok(Self::with_strategy(config, interval_secs, build_strategy(config)))
    }

    /// Engine around an explicit strategy
    pub fn with_strategy(config: &AppConfig, interval_secs: i64, strategy: Box<dyn Strategy>) -> Self {
        Self {
            label: config.strategy_label(),
            aggregator: CandleAggregator::new(interval_secs),
            series: CandleSeries::new(interval_secs, config.market.max_candles),
            indicators: IndicatorEngine::new(config.indicators.clone()),
            strategy,
            positions: PositionManager::new(config.exit.clone()),
            snapshot: IndicatorSnapshot::default(),
            last_seen: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn series(&self) -> &CandleSeries {
        &self.series
    }

    pub fn snapshot(&self) -> &IndicatorSnapshot {
        &self.snapshot
    }

    pub fn positions(&self) -> &PositionManager {
        &self.positions
    }

    pub fn open_candle(&self) -> Option<&Candle> {
        self.aggregator.open_candle()
    }

    /// Seed the series with closed history candles
    ///
    /// Live trades for buckets at or before the last seeded candle are rejected afterwards.
    pub fn seed_history(&mut self, candles: Vec<Candle>) -> usize {
        let mut seeded = 0;
        for candle in candles {
            match self.series.push(candle) {
                Ok(filled) => {
                    seeded += 1;
                    self.snapshot = self.indicators.on_candle(&self.series, filled + 1);
                }
                Err(e) => tracing::debug!("[{}] Skipping history candle: {}", self.label, e),
            }
        }

        if let Some(last) = self.series.last() {
            self.aggregator.resume_after(last.timestamp());
        }

        tracing::info!(
            "[{}] Seeded {} history candles ({} in series)",
            self.label,
            seeded,
            self.series.len()
        );
        seeded
    }

    /// Feed one live trade
    ///
    /// Stale and malformed trades are logged and dropped.
    pub fn on_trade(&mut self, trade: &TradeEvent) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        let sealed = match self.aggregator.on_trade(trade) {
            Ok(sealed) => sealed,
            Err(e @ Error::StaleData { .. }) => {
                tracing::debug!("[{}] Dropping trade: {}", self.label, e);
                return events;
            }
            Err(e) => {
                tracing::warn!("[{}] Dropping trade: {}", self.label, e);
                return events;
            }
        };

        let at = trade.timestamp().unwrap_or_else(Utc::now);
        self.last_seen = Some(at);

        if let Some(candle) = sealed {
            events.extend(self.on_candle_closed(candle, at));
        }

        let recent = self.series.recent(RECENT_CANDLES);
        let position_events = self.positions.on_tick(trade.price, at, recent);
        events.extend(position_events.into_iter().map(EngineEvent::from));

        events
    }

    /// Process a sealed candle: extend the series, update indicators, manage the position,
    /// then look for an entry if FLAT
    pub fn on_candle_closed(&mut self, candle: Candle, closed_at: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = Vec::new();

        let filled = match self.series.push(candle.clone()) {
            Ok(filled) => filled,
            Err(e) => {
                tracing::debug!("[{}] Rejecting sealed candle: {}", self.label, e);
                return events;
            }
        };
        if filled > 0 {
            tracing::debug!("[{}] Filled {} empty buckets", self.label, filled);
        }

        tracing::info!(
            "[{}] Candle {} O:{} H:{} L:{} C:{} V:{} delta:{}",
            self.label,
            candle.bucket_start().format("%Y-%m-%d %H:%M"),
            candle.open(),
            candle.high(),
            candle.low(),
            candle.close(),
            candle.volume(),
            candle.delta()
        );

        self.snapshot = self.indicators.on_candle(&self.series, filled + 1);
        events.push(EngineEvent::CandleSealed(candle.clone()));

        let recent = self.series.recent(RECENT_CANDLES);
        let position_events = self.positions.on_candle(&candle, closed_at, recent);
        events.extend(position_events.into_iter().map(EngineEvent::from));

        if self.positions.is_flat() {
            if let Some(signal) = self.detect() {
                if self.positions.begin_entry(signal.clone()) {
                    events.push(EngineEvent::EntryRequested(signal));
                }
            }
        }

        events
    }

    fn detect(&self) -> Option<Signal> {
        if self.series.len() < self.strategy.min_candles_required() {
            tracing::debug!(
                "[{}] Warming up: {}/{} candles",
                self.label,
                self.series.len(),
                self.strategy.min_candles_required()
            );
            return None;
        }

        match self.strategy.detect(&self.series, &self.snapshot) {
            Ok(Some(signal)) => {
                tracing::info!(
                    "[{}] {} signal @ {} (stop: {}, target: {:?}): {}",
                    self.label,
                    signal.direction,
                    signal.entry_price,
                    signal.stop_loss,
                    signal.target,
                    signal.reason
                );
                Some(signal)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("[{}] No signal: {}", self.label, e);
                None
            }
        }
    }

    /// Resolve the in-flight entry order
    ///
    /// A rejected or timed-out order returns the engine to FLAT; the next signal can only come
    /// from a later candle.
    pub fn on_order_result(&mut self, result: Result<OrderAck>) -> Vec<EngineEvent> {
        let at = self.last_seen.unwrap_or_else(Utc::now);
        match result {
            Ok(ack) => self
                .positions
                .confirm_entry(Some(ack.order_id), at)
                .cloned()
                .map(EngineEvent::PositionOpened)
                .into_iter()
                .collect(),
            Err(e) => {
                if let Some(signal) = self.positions.abort_entry() {
                    tracing::warn!(
                        "[{}] {} entry failed, staying flat: {}",
                        self.label,
                        signal.direction,
                        e
                    );
                }
                Vec::new()
            }
        }
    }

    /// Discard the forming candle and report whatever position was open
    pub fn shutdown(&mut self) -> Option<Position> {
        if let Some(candle) = self.aggregator.discard_open() {
            tracing::debug!(
                "[{}] Discarding in-progress candle {}",
                self.label,
                candle.bucket_start()
            );
        }

        match self.positions.shutdown() {
            PositionState::Open(position) => {
                tracing::warn!(
                    "[{}] Shutting down with open {} @ {} (stop: {}), not closing it",
                    self.label,
                    position.direction,
                    position.entry_price,
                    position.stop_loss
                );
                Some(position)
            }
            PositionState::Pending(signal) => {
                tracing::warn!(
                    "[{}] Shutting down with {} entry order unresolved",
                    self.label,
                    signal.direction
                );
                None
            }
            PositionState::Flat => None,
        }
    }
}

impl From<PositionEvent> for EngineEvent {
    fn from(event: PositionEvent) -> Self {
        match event {
            PositionEvent::Trailed(advance) => EngineEvent::TrailAdvanced(advance),
            PositionEvent::Closed(closed) => EngineEvent::PositionClosed(closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyKind;
    use crate::models::{Direction, ExitReason};
    use rust_decimal::dec;
    use rust_decimal::Decimal;

    fn config() -> AppConfig {
        let mut config = AppConfig::default().with_interval("5m").unwrap();
        config.strategy.kind = StrategyKind::VolumeDelta;
        config.strategy.volume_delta.consecutive_candles = 1;
        config.strategy.volume_delta.min_delta = dec!(5);
        config
    }

    fn trade(secs: i64, price: Decimal, size: Decimal, taker_buy: bool) -> TradeEvent {
        TradeEvent::new(price, size, secs * 1_000_000, taker_buy)
    }

    fn closed(events: &[EngineEvent]) -> Option<&ClosedPosition> {
        events.iter().find_map(|e| match e {
            EngineEvent::PositionClosed(c) => Some(c),
            _ => None,
        })
    }

    #[test]
    fn test_seal_signal_and_entry() {
        let mut engine = StrategyEngine::new(&config()).unwrap();

        assert!(engine.on_trade(&trade(0, dec!(100000), dec!(10), true)).is_empty());
        engine.on_trade(&trade(100, dec!(100100), dec!(10), true));

        let events = engine.on_trade(&trade(300, dec!(100100), dec!(1), false));
        assert!(matches!(events[0], EngineEvent::CandleSealed(_)));
        let Some(EngineEvent::EntryRequested(signal)) = events.get(1) else {
            panic!("expected entry request, got {:?}", events);
        };
        assert_eq!(signal.direction, Direction::Long);
        assert!(matches!(engine.positions().state(), PositionState::Pending(_)));

        let opened = engine.on_order_result(Ok(OrderAck {
            order_id: "paper-1".to_string(),
        }));
        let [EngineEvent::PositionOpened(position)] = opened.as_slice() else {
            panic!("expected open, got {:?}", opened);
        };
        assert_eq!(position.entry_price, dec!(100100));
        assert_eq!(position.order_id.as_deref(), Some("paper-1"));
    }

    #[test]
    fn test_rejected_entry_stays_flat() {
        let mut engine = StrategyEngine::new(&config()).unwrap();
        engine.on_trade(&trade(0, dec!(100000), dec!(10), true));
        engine.on_trade(&trade(100, dec!(100100), dec!(10), true));
        engine.on_trade(&trade(300, dec!(100100), dec!(1), false));

        let events = engine.on_order_result(Err(Error::OrderRejected {
            code: "insufficient_margin".to_string(),
            message: "no".to_string(),
        }));
        assert!(events.is_empty());
        assert!(engine.positions().is_flat());
    }

    #[test]
    fn test_tick_hits_target() {
        let mut cfg = config();
        cfg.exit.mode = crate::config::ExitMode::Fixed;
        let mut engine = StrategyEngine::new(&cfg).unwrap();
        engine.on_trade(&trade(0, dec!(100000), dec!(10), true));
        engine.on_trade(&trade(100, dec!(100100), dec!(10), true));
        engine.on_trade(&trade(300, dec!(100100), dec!(1), false));
        engine.on_order_result(Ok(OrderAck {
            order_id: "1".to_string(),
        }));

        // target = 100100 * 1.006 = 100700.6
        let events = engine.on_trade(&trade(310, dec!(100701), dec!(1), true));
        let closed = closed(&events).unwrap();
        assert_eq!(closed.exit_reason, ExitReason::Target);
        assert_eq!(closed.exit_price, dec!(100701));
        assert!(engine.positions().is_flat());
    }

    #[test]
    fn test_stale_trade_dropped() {
        let mut engine = StrategyEngine::new(&config()).unwrap();
        engine.on_trade(&trade(300, dec!(100), dec!(1), true));
        assert!(engine.on_trade(&trade(10, dec!(200), dec!(1), true)).is_empty());
        assert_eq!(engine.open_candle().unwrap().high(), dec!(100));
    }

    #[test]
    fn test_seed_history_blocks_covered_buckets() {
        let mut engine = StrategyEngine::new(&config()).unwrap();
        let candles: Vec<Candle> = (0..3)
            .map(|i| {
                Candle::new(
                    DateTime::from_timestamp(i * 300, 0).unwrap(),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                    dec!(1),
                )
                .unwrap()
            })
            .collect();

        assert_eq!(engine.seed_history(candles), 3);
        assert!(engine.on_trade(&trade(650, dec!(100), dec!(1), true)).is_empty());
        assert!(engine.open_candle().is_none());

        engine.on_trade(&trade(900, dec!(100), dec!(1), true));
        assert_eq!(engine.open_candle().unwrap().timestamp(), 900);
    }

    #[test]
    fn test_shutdown_reports_open_position() {
        let mut engine = StrategyEngine::new(&config()).unwrap();
        engine.on_trade(&trade(0, dec!(100000), dec!(10), true));
        engine.on_trade(&trade(100, dec!(100100), dec!(10), true));
        engine.on_trade(&trade(300, dec!(100100), dec!(1), false));
        engine.on_order_result(Ok(OrderAck {
            order_id: "1".to_string(),
        }));

        let position = engine.shutdown().unwrap();
        assert_eq!(position.direction, Direction::Long);
        assert!(engine.open_candle().is_none());
        assert!(engine.positions().is_flat());
    }
}
