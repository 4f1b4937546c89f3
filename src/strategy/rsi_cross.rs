use crate::config::RsiConfig;
use crate::error::Error;
use crate::execution::CandleSeries;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Direction, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// RSI threshold cross strategy
///
/// - LONG when the smoothed RSI crosses up out of oversold (prev <= oversold < curr)
/// - SHORT when it crosses down out of overbought (prev >= overbought > curr)
///
/// The stop sits at the signal candle's low (LONG) or high (SHORT). There is no fixed
/// target; exits are left to the trailing stop.
#[derive(Debug, Clone)]
pub struct RsiCrossStrategy {
    config: RsiConfig,
    rsi_period: usize,
}

impl RsiCrossStrategy {
    pub fn new(config: RsiConfig, rsi_period: usize) -> Self {
        Self { config, rsi_period }
    }
}

impl Strategy for RsiCrossStrategy {
    fn detect(&self, series: &CandleSeries, indicators: &IndicatorSnapshot) -> Result<Option<Signal>> {
        let reading = indicators.require_rsi()?;
        let prev = reading.previous.ok_or(Error::IndicatorUndefined("rsi"))?;
        let curr = reading.value;

        let Some(candle) = series.last() else {
            return Ok(None);
        };

        let (direction, stop_loss, threshold) =
            if prev <= self.config.oversold && curr > self.config.oversold {
                (Direction::Long, candle.low(), self.config.oversold)
            } else if prev >= self.config.overbought && curr < self.config.overbought {
                (Direction::Short, candle.high(), self.config.overbought)
            } else {
                return Ok(None);
            };

        let verb = match direction {
            Direction::Long => "above",
            Direction::Short => "below",
        };

        Ok(Some(Signal {
            direction,
            entry_price: candle.close(),
            stop_loss,
            target: None,
            reason: format!(
                "RSI crossed {} {} ({:.2} -> {:.2})",
                verb, threshold, prev, curr
            ),
            candle_time: candle.bucket_start(),
        }))
    }

    fn name(&self) -> &str {
        "RSI Cross"
    }

    fn min_candles_required(&self) -> usize {
        self.rsi_period + 2
    }
}
