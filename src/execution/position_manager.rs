use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::{ExitConfig, ExitMode, TrailBasis};
use crate::models::{Candle, ClosedPosition, Direction, ExitReason, Signal};

/// Candles inspected for an opposing delta
const DELTA_REVERSAL_CANDLES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub initial_stop: Decimal,
    /// Fixed target from the signal, used in fixed exit mode
    pub target: Option<Decimal>,
    pub risk_unit: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Profit multiple the next ratchet waits for
    pub trail_level: u32,
    pub max_trail_reached: u32,
    pub order_id: Option<String>,
    /// Time of the last trade price evaluated against this position
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl Position {
    fn from_signal(signal: &Signal, first_target_level: u32, opened_at: DateTime<Utc>, order_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            initial_stop: signal.stop_loss,
            target: signal.target,
            risk_unit: signal.risk_unit(),
            opened_at,
            trail_level: first_target_level,
            max_trail_reached: 0,
            order_id,
            last_tick_at: None,
        }
    }

    /// Unrealized P&L at `price`
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.direction.pnl(self.entry_price, price)
    }

    fn stop_touched(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    fn reached(&self, price: Decimal, level: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= level,
            Direction::Short => price <= level,
        }
    }

    fn stop_reason(&self) -> ExitReason {
        if self.max_trail_reached > 0 {
            ExitReason::TrailingStop(self.max_trail_reached)
        } else {
            ExitReason::StopLoss
        }
    }

    fn close(&self, exit_price: Decimal, exit_time: DateTime<Utc>, exit_reason: ExitReason) -> ClosedPosition {
        ClosedPosition {
            direction: self.direction,
            entry_price: self.entry_price,
            exit_price,
            entry_time: self.opened_at,
            exit_time,
            stop_loss: self.stop_loss,
            initial_stop: self.initial_stop,
            risk_unit: self.risk_unit,
            max_trail_reached: self.max_trail_reached,
            exit_reason,
        }
    }
}

/// A ratchet of the trailing stop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailAdvance {
    /// Profit multiple that was reached
    pub level: u32,
    pub new_stop: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Trailed(TrailAdvance),
    Closed(ClosedPosition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    Flat,
    /// Entry order in flight
    Pending(Signal),
    Open(Position),
}

/// Single-position state machine: FLAT -> PENDING -> OPEN -> FLAT
pub struct PositionManager {
    config: ExitConfig,
    state: PositionState,
}

impl PositionManager {
    pub fn new(config: ExitConfig) -> Self {
        Self {
            config,
            state: PositionState::Flat,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn is_flat(&self) -> bool {
        matches!(self.state, PositionState::Flat)
    }

    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            PositionState::Open(p) => Some(p),
            _ => None,
        }
    }

    /// FLAT -> PENDING. Returns false (and changes nothing) unless FLAT.
    pub fn begin_entry(&mut self, signal: Signal) -> bool {
        if !self.is_flat() {
            return false;
        }
        self.state = PositionState::Pending(signal);
        true
    }

    /// PENDING -> OPEN on a confirmed fill
    pub fn confirm_entry(&mut self, order_id: Option<String>, at: DateTime<Utc>) -> Option<&Position> {
        let PositionState::Pending(signal) = &self.state else {
            return None;
        };

        let position = Position::from_signal(signal, self.config.first_target_level, at, order_id);
        tracing::info!(
            "Opened {} @ {} (stop: {}, risk: {}, target: {:?})",
            position.direction,
            position.entry_price,
            position.stop_loss,
            position.risk_unit,
            position.target
        );

        self.state = PositionState::Open(position);
        self.position()
    }

    /// PENDING -> FLAT after a rejected or timed-out entry
    pub fn abort_entry(&mut self) -> Option<Signal> {
        match std::mem::replace(&mut self.state, PositionState::Flat) {
            PositionState::Pending(signal) => Some(signal),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Next profit level the trailing stop ratchets at
    pub fn next_trail_target(&self, position: &Position) -> Decimal {
        let sign = position.direction.sign();
        match self.config.trail_basis {
            TrailBasis::Entry => {
                position.entry_price + sign * Decimal::from(position.trail_level) * position.risk_unit
            }
            TrailBasis::Stop => {
                let distance = Decimal::from(self.config.first_target_level + 1) * position.risk_unit;
                position.stop_loss + sign * distance
            }
        }
    }

    /// Evaluate the open position against a live trade price
    ///
    /// Exits fill at `price`. `recent` are the latest sealed candles, newest last.
    pub fn on_tick(&mut self, price: Decimal, at: DateTime<Utc>, recent: &[Candle]) -> Vec<PositionEvent> {
        self.evaluate(PriceUpdate::Tick(price), at, recent)
    }

    /// Evaluate the open position against a sealed candle's range
    ///
    /// Stop and target exits fill at their level. The range is skipped, leaving only the delta
    /// and time checks, when part of it predates the entry or when trades inside the candle
    /// were already evaluated one by one: the stop may have moved since the extremes printed.
    pub fn on_candle(&mut self, candle: &Candle, closed_at: DateTime<Utc>, recent: &[Candle]) -> Vec<PositionEvent> {
        self.evaluate(PriceUpdate::Candle(candle.clone()), closed_at, recent)
    }

    fn evaluate(&mut self, update: PriceUpdate, at: DateTime<Utc>, recent: &[Candle]) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        if !matches!(self.state, PositionState::Open(_)) {
            return events;
        }
        let PositionState::Open(mut position) = std::mem::replace(&mut self.state, PositionState::Flat) else {
            return events;
        };

        let closed = self.check_exits(&mut position, &update, at, recent, &mut events);
        match closed {
            Some(closed) => {
                tracing::info!(
                    "Closed {} @ {} ({}) pnl: {} ({:.2}R)",
                    closed.direction,
                    closed.exit_price,
                    closed.exit_reason,
                    closed.pnl(),
                    closed.r_multiple()
                );
                events.push(PositionEvent::Closed(closed));
            }
            None => self.state = PositionState::Open(position),
        }

        events
    }

    fn check_exits(
        &self,
        position: &mut Position,
        update: &PriceUpdate,
        at: DateTime<Utc>,
        recent: &[Candle],
        events: &mut Vec<PositionEvent>,
    ) -> Option<ClosedPosition> {
        let (adverse, favourable, last) = match update {
            PriceUpdate::Tick(price) => {
                position.last_tick_at = Some(at);
                (Some(*price), Some(*price), *price)
            }
            PriceUpdate::Candle(candle)
                if candle.bucket_start() < position.opened_at
                    || position.last_tick_at.is_some_and(|t| t >= candle.bucket_start()) =>
            {
                (None, None, candle.close())
            }
            PriceUpdate::Candle(candle) => match position.direction {
                Direction::Long => (Some(candle.low()), Some(candle.high()), candle.close()),
                Direction::Short => (Some(candle.high()), Some(candle.low()), candle.close()),
            },
        };
        let fill = |level: Decimal| match update {
            PriceUpdate::Tick(price) => *price,
            PriceUpdate::Candle(_) => level,
        };

        // 1. stop
        if let Some(adverse) = adverse {
            if position.stop_touched(adverse) {
                return Some(position.close(fill(position.stop_loss), at, position.stop_reason()));
            }
        }

        // 2. trail / target
        if let Some(favourable) = favourable {
            match self.config.mode {
                ExitMode::Fixed => {
                    if let Some(target) = position.target {
                        if position.reached(favourable, target) {
                            return Some(position.close(fill(target), at, ExitReason::Target));
                        }
                    }
                }
                ExitMode::Trailing => {
                    if let Some(advance) = self.ratchet(position, favourable) {
                        events.push(PositionEvent::Trailed(advance));
                    }
                }
            }
        }

        // 3. opposing delta
        if let Some(threshold) = self.config.delta_reversal_threshold {
            let opposing = recent
                .iter()
                .rev()
                .take(DELTA_REVERSAL_CANDLES)
                .any(|c| match position.direction {
                    Direction::Long => c.delta() < -threshold,
                    Direction::Short => c.delta() > threshold,
                });
            if opposing {
                return Some(position.close(last, at, ExitReason::DeltaReversal));
            }
        }

        // 4. max hold
        let max_hold = self
            .config
            .max_hold_minutes
            .and_then(|m| i64::try_from(m).ok())
            .and_then(Duration::try_minutes);
        if let Some(max_hold) = max_hold {
            if at - position.opened_at >= max_hold {
                return Some(position.close(last, at, ExitReason::TimeExit));
            }
        }

        None
    }

    /// Advance the trailing stop by at most one level
    fn ratchet(&self, position: &mut Position, price: Decimal) -> Option<TrailAdvance> {
        if position.risk_unit.is_zero() {
            return None;
        }

        let target = self.next_trail_target(position);
        if !position.reached(price, target) {
            return None;
        }

        let sign = position.direction.sign();
        let locked = position.entry_price + self.config.trail_lock_pct * (target - position.entry_price);
        // Only ever tighten
        if (locked - position.stop_loss) * sign > Decimal::ZERO {
            position.stop_loss = locked;
        }

        let level = position.trail_level;
        position.max_trail_reached = level;
        position.trail_level = level + 1;

        tracing::info!(
            "{}X reached @ {}: stop -> {}, aiming for {}X",
            level,
            price,
            position.stop_loss,
            position.trail_level
        );

        Some(TrailAdvance {
            level,
            new_stop: position.stop_loss,
        })
    }

    /// Drop any pending or open state, returning what was open
    pub fn shutdown(&mut self) -> PositionState {
        std::mem::replace(&mut self.state, PositionState::Flat)
    }
}

enum PriceUpdate {
    Tick(Decimal),
    Candle(Candle),
}
