// Technical indicators module
// ATR, volume MA, swing points and smoothed RSI over the sealed candle series

pub mod atr;
pub mod moving_average;
pub mod rsi;
pub mod swing;

pub use atr::{calculate_atr, true_ranges};
pub use moving_average::{calculate_sma, volume_ma};
pub use rsi::{calculate_rsi, RsiReading, RsiTracker};
pub use swing::{detect_swing_highs, detect_swing_lows, line_value_at, SwingKind, SwingPoint};

use rust_decimal::Decimal;

use crate::config::IndicatorConfig;
use crate::error::Error;
use crate::execution::CandleSeries;
use crate::Result;

/// Indicator values as of the most recent sealed candle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSnapshot {
    pub atr: Option<Decimal>,
    pub volume_ma: Option<Decimal>,
    pub rsi: Option<RsiReading>,
    pub swing_highs: Vec<SwingPoint>,
    pub swing_lows: Vec<SwingPoint>,
}

impl IndicatorSnapshot {
    pub fn require_atr(&self) -> Result<Decimal> {
        self.atr.ok_or(Error::IndicatorUndefined("atr"))
    }

    pub fn require_rsi(&self) -> Result<RsiReading> {
        self.rsi.ok_or(Error::IndicatorUndefined("rsi"))
    }

    /// Most recent swing high strictly before `index`
    pub fn last_swing_high_before(&self, index: usize) -> Option<&SwingPoint> {
        self.swing_highs.iter().rev().find(|p| p.index < index)
    }

    /// Most recent swing low strictly before `index`
    pub fn last_swing_low_before(&self, index: usize) -> Option<&SwingPoint> {
        self.swing_lows.iter().rev().find(|p| p.index < index)
    }
}

/// Recomputes indicators once per sealed candle
///
/// ATR, volume MA and swings are pure functions of the series; the RSI tracker carries
/// the raw history behind its smoothed line between candles, so it is folded once per
/// appended candle, gap fillers included.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
    rsi: RsiTracker,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        let rsi = RsiTracker::new(config.rsi_period, config.rsi_smoothing_length);
        Self { config, rsi }
    }

    /// `appended` is how many candles the last push added to the series
    pub fn on_candle(&mut self, series: &CandleSeries, appended: usize) -> IndicatorSnapshot {
        let candles = series.as_slice();
        let closes: Vec<Decimal> = candles.iter().map(|c| c.close()).collect();

        let mut rsi = None;
        for pending in (0..appended.clamp(1, closes.len().max(1))).rev() {
            rsi = self.rsi.update(&closes[..closes.len() - pending]);
        }

        let snapshot = IndicatorSnapshot {
            atr: calculate_atr(candles, self.config.atr_length),
            volume_ma: volume_ma(candles, self.config.volume_ma_window),
            rsi,
            swing_highs: detect_swing_highs(candles, self.config.swing_lookback),
            swing_lows: detect_swing_lows(candles, self.config.swing_lookback),
        };

        tracing::debug!(
            atr = ?snapshot.atr,
            volume_ma = ?snapshot.volume_ma,
            rsi = ?snapshot.rsi.map(|r| r.value),
            swing_highs = snapshot.swing_highs.len(),
            swing_lows = snapshot.swing_lows.len(),
            "Indicators updated"
        );

        snapshot
    }
}
