use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;
use crate::Result;

const MICROS_PER_SEC: i64 = 1_000_000;

/// A single executed trade from the upstream feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp_micros: i64,
    pub is_taker_buy: bool,
}

impl TradeEvent {
    pub fn new(price: Decimal, size: Decimal, timestamp_micros: i64, is_taker_buy: bool) -> Self {
        Self {
            price,
            size,
            timestamp_micros,
            is_taker_buy,
        }
    }

    /// Whole seconds since the epoch (floored, also for pre-epoch timestamps)
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp_micros.div_euclid(MICROS_PER_SEC)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.timestamp_micros)
    }
}

/// OHLCV candle covering one bucket
///
/// Fields are private so that `high >= max(open, close)`, `low <= min(open, close)` and
/// `0 <= buy_volume <= volume` hold for every value of this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    bucket_start: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    buy_volume: Decimal,
}

impl Candle {
    /// Build a candle, rejecting inconsistent OHLC values
    pub fn new(
        bucket_start: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self> {
        if high < open.max(close) || low > open.min(close) {
            return Err(Error::Feed(format!(
                "inconsistent candle at {}: o={} h={} l={} c={}",
                bucket_start, open, high, low, close
            )));
        }
        if volume < Decimal::ZERO {
            return Err(Error::Feed(format!(
                "negative volume {} at {}",
                volume, bucket_start
            )));
        }

        Ok(Self {
            bucket_start,
            open,
            high,
            low,
            close,
            volume,
            buy_volume: Decimal::ZERO,
        })
    }

    /// Attach the taker-buy share of the volume
    pub fn with_buy_volume(mut self, buy_volume: Decimal) -> Result<Self> {
        if buy_volume < Decimal::ZERO || buy_volume > self.volume {
            return Err(Error::Feed(format!(
                "buy volume {} outside 0..={} at {}",
                buy_volume, self.volume, self.bucket_start
            )));
        }
        self.buy_volume = buy_volume;
        Ok(self)
    }

    /// A candle opened by the first trade of a bucket: O=H=L=C=price, no volume yet
    pub fn opening(bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
        }
    }

    /// Gap filler carrying the previous close forward with zero volume
    pub fn flat(bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self::opening(bucket_start, price)
    }

    /// Fold one trade into this candle
    pub(crate) fn apply_trade(&mut self, price: Decimal, size: Decimal, is_taker_buy: bool) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        if is_taker_buy {
            self.buy_volume += size;
        }
    }

    pub fn bucket_start(&self) -> DateTime<Utc> {
        self.bucket_start
    }

    /// Bucket start in epoch seconds
    pub fn timestamp(&self) -> i64 {
        self.bucket_start.timestamp()
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn buy_volume(&self) -> Decimal {
        self.buy_volume
    }

    pub fn sell_volume(&self) -> Decimal {
        self.volume - self.buy_volume
    }

    /// Taker buy volume minus taker sell volume
    pub fn delta(&self) -> Decimal {
        self.buy_volume - self.sell_volume()
    }

    pub fn buy_pct(&self) -> Decimal {
        if self.volume.is_zero() {
            return Decimal::ZERO;
        }
        self.buy_volume / self.volume * Decimal::ONE_HUNDRED
    }

    pub fn sell_pct(&self) -> Decimal {
        if self.volume.is_zero() {
            return Decimal::ZERO;
        }
        self.sell_volume() / self.volume * Decimal::ONE_HUNDRED
    }

    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }

    /// True range against the previous close (plain range for the first candle)
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let range = self.high - self.low;
        match prev_close {
            Some(prev) => range
                .max((self.high - prev).abs())
                .max((self.low - prev).abs()),
            None => range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    pub fn exit_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }

    /// Signed profit of moving from `entry` to `exit`
    pub fn pnl(&self, entry: Decimal, exit: Decimal) -> Decimal {
        match self {
            Direction::Long => exit - entry,
            Direction::Short => entry - exit,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Entry condition produced by a strategy on a sealed candle
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub target: Option<Decimal>,
    pub reason: String,
    pub candle_time: DateTime<Utc>,
}

impl Signal {
    /// Distance between entry and the initial stop
    pub fn risk_unit(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    /// Ratcheted stop hit after reaching the given profit multiple
    TrailingStop(u32),
    Target,
    TimeExit,
    DeltaReversal,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "STOP_LOSS"),
            ExitReason::TrailingStop(level) => write!(f, "TRAIL_SL_{}X", level),
            ExitReason::Target => write!(f, "TARGET"),
            ExitReason::TimeExit => write!(f, "TIME_EXIT"),
            ExitReason::DeltaReversal => write!(f, "DELTA_REVERSAL"),
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STOP_LOSS" => Ok(ExitReason::StopLoss),
            "TARGET" | "TAKE_PROFIT" => Ok(ExitReason::Target),
            "TIME_EXIT" => Ok(ExitReason::TimeExit),
            "DELTA_REVERSAL" => Ok(ExitReason::DeltaReversal),
            other => other
                .strip_prefix("TRAIL_SL_")
                .and_then(|rest| rest.strip_suffix('X'))
                .and_then(|n| n.parse().ok())
                .map(ExitReason::TrailingStop)
                .ok_or_else(|| Error::Feed(format!("unknown exit reason '{}'", other))),
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExitReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A position that has just transitioned to FLAT, before it gets a trade id
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub initial_stop: Decimal,
    pub risk_unit: Decimal,
    pub max_trail_reached: u32,
    pub exit_reason: ExitReason,
}

impl ClosedPosition {
    pub fn pnl(&self) -> Decimal {
        self.direction.pnl(self.entry_price, self.exit_price)
    }

    pub fn pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl() / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Realized P&L in risk units, 0 when the risk unit is 0
    pub fn r_multiple(&self) -> Decimal {
        if self.risk_unit.is_zero() {
            return Decimal::ZERO;
        }
        self.pnl() / self.risk_unit
    }

    pub fn is_win(&self) -> bool {
        self.pnl() > Decimal::ZERO
    }
}

/// Immutable trade log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: u64,
    pub strategy: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub initial_stop: Decimal,
    pub risk: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub r_multiple: Decimal,
    pub exit_reason: ExitReason,
    pub is_win: bool,
    pub max_trail_reached: u32,
    pub duration_minutes: Decimal,
}

impl TradeRecord {
    pub fn from_closed(trade_id: u64, strategy: &str, closed: &ClosedPosition) -> Self {
        let duration_secs = (closed.exit_time - closed.entry_time).num_seconds();
        Self {
            trade_id,
            strategy: strategy.to_string(),
            direction: closed.direction,
            entry_price: closed.entry_price,
            exit_price: closed.exit_price,
            entry_time: closed.entry_time,
            exit_time: closed.exit_time,
            stop_loss: closed.stop_loss,
            initial_stop: closed.initial_stop,
            risk: closed.risk_unit,
            pnl: closed.pnl(),
            pnl_pct: closed.pnl_pct().round_dp(4),
            r_multiple: closed.r_multiple().round_dp(4),
            exit_reason: closed.exit_reason,
            is_win: closed.is_win(),
            max_trail_reached: closed.max_trail_reached,
            duration_minutes: (Decimal::from(duration_secs) / Decimal::from(60)).round_dp(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_candle_rejects_inconsistent_ohlc() {
        let bad = Candle::new(ts(0), dec!(100), dec!(99), dec!(95), dec!(98), dec!(1));
        assert!(bad.is_err());

        let bad_low = Candle::new(ts(0), dec!(100), dec!(105), dec!(101), dec!(102), dec!(1));
        assert!(bad_low.is_err());

        let ok = Candle::new(ts(0), dec!(100), dec!(105), dec!(95), dec!(102), dec!(1));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_buy_volume_bounded_by_volume() {
        let candle = Candle::new(ts(0), dec!(100), dec!(105), dec!(95), dec!(102), dec!(10)).unwrap();
        assert!(candle.clone().with_buy_volume(dec!(11)).is_err());

        let candle = candle.with_buy_volume(dec!(7)).unwrap();
        assert_eq!(candle.sell_volume(), dec!(3));
        assert_eq!(candle.delta(), dec!(4));
        assert_eq!(candle.buy_pct(), dec!(70));
    }

    #[test]
    fn test_apply_trade_tracks_extremes() {
        let mut candle = Candle::opening(ts(0), dec!(100));
        candle.apply_trade(dec!(100), dec!(2), true);
        candle.apply_trade(dec!(104), dec!(1), false);
        candle.apply_trade(dec!(97), dec!(3), true);

        assert_eq!(candle.open(), dec!(100));
        assert_eq!(candle.high(), dec!(104));
        assert_eq!(candle.low(), dec!(97));
        assert_eq!(candle.close(), dec!(97));
        assert_eq!(candle.volume(), dec!(6));
        assert_eq!(candle.buy_volume(), dec!(5));
    }

    #[test]
    fn test_true_range_uses_previous_close_gap() {
        let candle = Candle::new(ts(0), dec!(110), dec!(112), dec!(108), dec!(111), dec!(1)).unwrap();
        assert_eq!(candle.true_range(None), dec!(4));
        assert_eq!(candle.true_range(Some(dec!(100))), dec!(12));
    }

    #[test]
    fn test_trade_timestamp_floors_negative_micros() {
        let trade = TradeEvent::new(dec!(1), dec!(1), -1, false);
        assert_eq!(trade.timestamp_secs(), -1);
    }

    #[test]
    fn test_exit_reason_strings() {
        assert_eq!(ExitReason::TrailingStop(2).to_string(), "TRAIL_SL_2X");
        assert_eq!(ExitReason::StopLoss.to_string(), "STOP_LOSS");
        assert_eq!("TRAIL_SL_3X".parse::<ExitReason>().unwrap(), ExitReason::TrailingStop(3));
        assert_eq!("TIME_EXIT".parse::<ExitReason>().unwrap(), ExitReason::TimeExit);
        assert!("BOGUS".parse::<ExitReason>().is_err());
    }

    #[test]
    fn test_closed_position_metrics() {
        let closed = ClosedPosition {
            direction: Direction::Short,
            entry_price: dec!(100),
            exit_price: dec!(90),
            entry_time: ts(0),
            exit_time: ts(1800),
            stop_loss: dec!(105),
            initial_stop: dec!(105),
            risk_unit: dec!(5),
            max_trail_reached: 0,
            exit_reason: ExitReason::Target,
        };

        assert_eq!(closed.pnl(), dec!(10));
        assert_eq!(closed.pnl_pct(), dec!(10));
        assert_eq!(closed.r_multiple(), dec!(2));
        assert!(closed.is_win());

        let record = TradeRecord::from_closed(7, "test", &closed);
        assert_eq!(record.trade_id, 7);
        assert_eq!(record.duration_minutes, dec!(30));
    }

    #[test]
    fn test_zero_risk_unit_gives_zero_r_multiple() {
        let closed = ClosedPosition {
            direction: Direction::Long,
            entry_price: dec!(100),
            exit_price: dec!(101),
            entry_time: ts(0),
            exit_time: ts(60),
            stop_loss: dec!(100),
            initial_stop: dec!(100),
            risk_unit: Decimal::ZERO,
            max_trail_reached: 0,
            exit_reason: ExitReason::TimeExit,
        };
        assert_eq!(closed.r_multiple(), Decimal::ZERO);
    }
}
