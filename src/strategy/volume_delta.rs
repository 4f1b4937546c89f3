use rust_decimal::Decimal;

use crate::config::VolumeDeltaConfig;
use crate::error::Error;
use crate::execution::CandleSeries;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Candle, Direction, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// Taker volume delta momentum strategy
///
/// Entry conditions for LONG (ALL must be true for each of the last
/// `consecutive_candles` sealed candles):
/// - delta >= min_delta
/// - buy share >= min_side_pct
/// - green candle
///
/// With more than one candle, the last close must also be above the first.
/// SHORT mirrors on negative delta, sell share and red candles.
/// Stop and target are fixed percentages of the entry price.
#[derive(Debug, Clone)]
pub struct VolumeDeltaStrategy {
    config: VolumeDeltaConfig,
}

impl VolumeDeltaStrategy {
    pub fn new(config: VolumeDeltaConfig) -> Self {
        Self { config }
    }

    fn buy_pressure(&self, candles: &[Candle]) -> bool {
        let all = candles.iter().all(|c| {
            c.delta() >= self.config.min_delta
                && c.buy_pct() >= self.config.min_side_pct
                && c.is_green()
        });
        all && rising(candles)
    }

    fn sell_pressure(&self, candles: &[Candle]) -> bool {
        let all = candles.iter().all(|c| {
            c.delta() <= -self.config.min_delta
                && c.sell_pct() >= self.config.min_side_pct
                && !c.is_green()
        });
        all && falling(candles)
    }

    fn levels(&self, direction: Direction, entry: Decimal) -> (Decimal, Decimal) {
        let sl = entry * self.config.stop_loss_pct / Decimal::ONE_HUNDRED;
        let tp = entry * self.config.take_profit_pct / Decimal::ONE_HUNDRED;
        match direction {
            Direction::Long => (entry - sl, entry + tp),
            Direction::Short => (entry + sl, entry - tp),
        }
    }
}

fn rising(candles: &[Candle]) -> bool {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) if candles.len() > 1 => last.close() > first.close(),
        _ => true,
    }
}

fn falling(candles: &[Candle]) -> bool {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) if candles.len() > 1 => last.close() < first.close(),
        _ => true,
    }
}

impl Strategy for VolumeDeltaStrategy {
    fn detect(&self, series: &CandleSeries, _indicators: &IndicatorSnapshot) -> Result<Option<Signal>> {
        let n = self.config.consecutive_candles;
        if series.len() < n {
            return Err(Error::IndicatorUndefined("volume_delta"));
        }

        let recent = series.recent(n);
        let direction = if self.buy_pressure(recent) {
            Direction::Long
        } else if self.sell_pressure(recent) {
            Direction::Short
        } else {
            return Ok(None);
        };

        let Some(last) = recent.last() else {
            return Ok(None);
        };
        let entry = last.close();
        let (stop_loss, target) = self.levels(direction, entry);

        Ok(Some(Signal {
            direction,
            entry_price: entry,
            stop_loss,
            target: Some(target),
            reason: format!("{} consecutive candles, last delta {}", n, last.delta()),
            candle_time: last.bucket_start(),
        }))
    }

    fn name(&self) -> &str {
        "Volume Delta"
    }

    fn min_candles_required(&self) -> usize {
        self.config.consecutive_candles
    }
}
