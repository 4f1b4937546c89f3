use rust_decimal::Decimal;

use crate::config::TrendlineConfig;
use crate::error::Error;
use crate::execution::CandleSeries;
use crate::indicators::{line_value_at, IndicatorSnapshot, SwingPoint};
use crate::models::{Direction, Signal};
use crate::strategy::Strategy;
use crate::Result;

/// Trendline breakout strategy
///
/// Draws a line through the two most recent swing highs (or lows) and enters when the
/// close crosses it with volume confirmation.
///
/// Entry conditions for LONG (SHORT mirrors on swing lows, and is only considered when the
/// close did not cross the swing-high line):
/// - The last two swing highs are strictly descending
/// - Previous close at or below the line, current close above it
/// - Volume above `volume_multiplier` x volume MA (skipped while the MA is undefined)
/// - ATR defined and positive
///
/// Stop: most recent swing low minus `atr_stop_multiplier` x ATR (current low if none).
/// Target: close plus `atr_target_multiplier` x ATR.
#[derive(Debug, Clone)]
pub struct TrendlineStrategy {
    config: TrendlineConfig,
    swing_lookback: usize,
}

impl TrendlineStrategy {
    pub fn new(config: TrendlineConfig, swing_lookback: usize) -> Self {
        Self {
            config,
            swing_lookback,
        }
    }

    fn breakout(
        &self,
        direction: Direction,
        series: &CandleSeries,
        indicators: &IndicatorSnapshot,
    ) -> Result<Breakout> {
        let candles = series.as_slice();
        let Some(i) = series.last_index().filter(|&i| i >= 1) else {
            return Ok(Breakout::NoCross);
        };
        let current = &candles[i];
        let prev_close = candles[i - 1].close();

        let swings = match direction {
            Direction::Long => &indicators.swing_highs,
            Direction::Short => &indicators.swing_lows,
        };
        let Some((first, second)) = last_two_before(swings, i) else {
            return Ok(Breakout::NoCross);
        };

        let sloped_correctly = match direction {
            Direction::Long => second.price < first.price,
            Direction::Short => second.price > first.price,
        };
        if !sloped_correctly {
            return Ok(Breakout::NoCross);
        }

        let line_prev = line_value_at(first, second, i - 1);
        let line_curr = line_value_at(first, second, i);
        let crossed = match direction {
            Direction::Long => prev_close <= line_prev && current.close() > line_curr,
            Direction::Short => prev_close >= line_prev && current.close() < line_curr,
        };
        if !crossed {
            return Ok(Breakout::NoCross);
        }

        if let Some(volume_ma) = indicators.volume_ma {
            if current.volume() <= self.config.volume_multiplier * volume_ma {
                tracing::debug!(
                    "{} breakout at {} lacks volume ({} <= {} x {})",
                    direction,
                    current.close(),
                    current.volume(),
                    self.config.volume_multiplier,
                    volume_ma
                );
                return Ok(Breakout::Rejected);
            }
        }

        let atr = indicators.require_atr()?;
        if atr <= Decimal::ZERO {
            return Ok(Breakout::Rejected);
        }

        let entry = current.close();
        let (stop_loss, target) = match direction {
            Direction::Long => {
                let reference = indicators
                    .last_swing_low_before(i)
                    .map(|p| p.price)
                    .unwrap_or_else(|| current.low());
                (
                    reference - self.config.atr_stop_multiplier * atr,
                    entry + self.config.atr_target_multiplier * atr,
                )
            }
            Direction::Short => {
                let reference = indicators
                    .last_swing_high_before(i)
                    .map(|p| p.price)
                    .unwrap_or_else(|| current.high());
                (
                    reference + self.config.atr_stop_multiplier * atr,
                    entry - self.config.atr_target_multiplier * atr,
                )
            }
        };

        Ok(Breakout::Signal(Signal {
            direction,
            entry_price: entry,
            stop_loss,
            target: Some(target),
            reason: format!(
                "{} trendline breakout ({} -> {}, line {})",
                direction,
                prev_close,
                entry,
                line_curr.round_dp(2)
            ),
            candle_time: current.bucket_start(),
        }))
    }
}

enum Breakout {
    NoCross,
    /// Crossed the line but failed confirmation
    Rejected,
    Signal(Signal),
}

/// The two most recent swing points strictly before `index`, oldest first
fn last_two_before(swings: &[SwingPoint], index: usize) -> Option<(&SwingPoint, &SwingPoint)> {
    let mut before = swings.iter().filter(|p| p.index < index).rev();
    let second = before.next()?;
    let first = before.next()?;
    Some((first, second))
}

impl Strategy for TrendlineStrategy {
    fn detect(&self, series: &CandleSeries, indicators: &IndicatorSnapshot) -> Result<Option<Signal>> {
        if series.len() < self.min_candles_required() {
            return Err(Error::IndicatorUndefined("trendline"));
        }

        match self.breakout(Direction::Long, series, indicators)? {
            Breakout::Signal(signal) => return Ok(Some(signal)),
            Breakout::Rejected => return Ok(None),
            Breakout::NoCross => {}
        }
        match self.breakout(Direction::Short, series, indicators)? {
            Breakout::Signal(signal) => Ok(Some(signal)),
            Breakout::Rejected | Breakout::NoCross => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "Trendline Breakout"
    }

    fn min_candles_required(&self) -> usize {
        self.config.min_candles.max(2 * self.swing_lookback + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candle;
    use chrono::DateTime;
    use rust_decimal::dec;

    fn create_test_candle(i: usize, close: Decimal, volume: Decimal) -> Candle {
        Candle::new(
            DateTime::from_timestamp(i as i64 * 900, 0).unwrap(),
            close,
            close + dec!(50),
            close - dec!(50),
            close,
            volume,
        )
        .unwrap()
    }

    /// 16 candles; candle 14 closes at 89800 and candle 15 at 90050
    fn breakout_series(last_volume: Decimal) -> CandleSeries {
        let mut series = CandleSeries::new(900, 200);
        for i in 0..14 {
            series.push(create_test_candle(i, dec!(89500), dec!(100))).unwrap();
        }
        series.push(create_test_candle(14, dec!(89800), dec!(100))).unwrap();
        series.push(create_test_candle(15, dec!(90050), last_volume)).unwrap();
        series
    }

    fn descending_highs() -> IndicatorSnapshot {
        IndicatorSnapshot {
            atr: Some(dec!(200)),
            volume_ma: Some(dec!(100)),
            rsi: None,
            swing_highs: vec![SwingPoint::high(10, dec!(91000)), SwingPoint::high(14, dec!(90000))],
            swing_lows: vec![],
        }
    }

    fn strategy() -> TrendlineStrategy {
        let config = TrendlineConfig {
            min_candles: 16,
            ..TrendlineConfig::default()
        };
        TrendlineStrategy::new(config, 3)
    }

    #[test]
    fn test_long_breakout_with_volume() {
        let series = breakout_series(dec!(130));
        let signal = strategy().detect(&series, &descending_highs()).unwrap().unwrap();

        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.entry_price, dec!(90050));
        // No swing low: current low (90000) - 1 x ATR
        assert_eq!(signal.stop_loss, dec!(89800));
        assert_eq!(signal.target, Some(dec!(90650)));
        assert_eq!(signal.risk_unit(), dec!(250));
    }

    #[test]
    fn test_no_breakout_without_volume() {
        let series = breakout_series(dec!(120));
        assert!(strategy().detect(&series, &descending_highs()).unwrap().is_none());
    }

    #[test]
    fn test_volume_check_skipped_without_ma() {
        let series = breakout_series(dec!(1));
        let mut snapshot = descending_highs();
        snapshot.volume_ma = None;
        assert!(strategy().detect(&series, &snapshot).unwrap().is_some());
    }

    #[test]
    fn test_uses_swing_low_for_stop() {
        let series = breakout_series(dec!(200));
        let mut snapshot = descending_highs();
        snapshot.swing_lows = vec![SwingPoint::low(12, dec!(89400))];

        let signal = strategy().detect(&series, &snapshot).unwrap().unwrap();
        assert_eq!(signal.stop_loss, dec!(89200));
    }

    #[test]
    fn test_ascending_highs_do_not_fire() {
        let series = breakout_series(dec!(200));
        let mut snapshot = descending_highs();
        snapshot.swing_highs = vec![SwingPoint::high(10, dec!(90000)), SwingPoint::high(14, dec!(91000))];
        assert!(strategy().detect(&series, &snapshot).unwrap().is_none());
    }

    #[test]
    fn test_undefined_atr_is_reported() {
        let series = breakout_series(dec!(200));
        let mut snapshot = descending_highs();
        snapshot.atr = None;
        assert!(matches!(
            strategy().detect(&series, &snapshot),
            Err(Error::IndicatorUndefined("atr"))
        ));
    }

    #[test]
    fn test_short_breakdown_on_ascending_lows() {
        let mut series = CandleSeries::new(900, 200);
        for i in 0..14 {
            series.push(create_test_candle(i, dec!(100500), dec!(100))).unwrap();
        }
        series.push(create_test_candle(14, dec!(100200), dec!(100))).unwrap();
        series.push(create_test_candle(15, dec!(99950), dec!(200))).unwrap();

        let snapshot = IndicatorSnapshot {
            atr: Some(dec!(100)),
            volume_ma: Some(dec!(100)),
            rsi: None,
            swing_highs: vec![SwingPoint::high(11, dec!(100800))],
            swing_lows: vec![SwingPoint::low(10, dec!(99000)), SwingPoint::low(14, dec!(100000))],
        };

        let signal = strategy().detect(&series, &snapshot).unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Short);
        assert_eq!(signal.stop_loss, dec!(100900));
        assert_eq!(signal.target, Some(dec!(99650)));
    }

    /// Both lines crossed by the same close: 91000 -> 90000 highs and 88300 -> 89800 lows
    fn both_lines_crossed() -> IndicatorSnapshot {
        let mut snapshot = descending_highs();
        snapshot.swing_lows = vec![SwingPoint::low(10, dec!(88300)), SwingPoint::low(14, dec!(89800))];
        snapshot
    }

    #[test]
    fn test_long_takes_precedence_when_both_cross() {
        let series = breakout_series(dec!(200));
        let signal = strategy().detect(&series, &both_lines_crossed()).unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_rejected_long_cross_skips_short() {
        let series = breakout_series(dec!(120));
        assert!(strategy().detect(&series, &both_lines_crossed()).unwrap().is_none());

        let mut snapshot = both_lines_crossed();
        snapshot.atr = Some(Decimal::ZERO);
        let series = breakout_series(dec!(200));
        assert!(strategy().detect(&series, &snapshot).unwrap().is_none());
    }

    #[test]
    fn test_short_series_is_undefined() {
        let mut series = CandleSeries::new(900, 200);
        series.push(create_test_candle(0, dec!(100), dec!(1))).unwrap();
        assert!(strategy().detect(&series, &descending_highs()).is_err());
    }
}
