// Trading strategy module
pub mod rsi_cross;
pub mod trendline;
pub mod volume_delta;

pub use rsi_cross::RsiCrossStrategy;
pub use trendline::TrendlineStrategy;
pub use volume_delta::VolumeDeltaStrategy;

use crate::config::{AppConfig, StrategyKind};
use crate::execution::CandleSeries;
use crate::indicators::IndicatorSnapshot;
use crate::models::Signal;
use crate::Result;

/// Base trait for all entry strategies
///
/// Evaluated once per sealed candle while FLAT. `Ok(None)` means no entry;
/// `Err(IndicatorUndefined)` means the strategy would need more history to decide.
pub trait Strategy: Send + Sync {
    fn detect(&self, series: &CandleSeries, indicators: &IndicatorSnapshot) -> Result<Option<Signal>>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

/// Build the strategy selected by `config.strategy.kind`
pub fn build_strategy(config: &AppConfig) -> Box<dyn Strategy> {
    match config.strategy.kind {
        StrategyKind::Trendline => Box::new(TrendlineStrategy::new(
            config.strategy.trendline.clone(),
            config.indicators.swing_lookback,
        )),
        StrategyKind::Rsi => Box::new(RsiCrossStrategy::new(
            config.strategy.rsi.clone(),
            config.indicators.rsi_period,
        )),
        StrategyKind::VolumeDelta => {
            Box::new(VolumeDeltaStrategy::new(config.strategy.volume_delta.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_strategy_by_kind() {
        let mut config = AppConfig::default();
        assert_eq!(build_strategy(&config).name(), "Trendline Breakout");

        config.strategy.kind = StrategyKind::Rsi;
        assert_eq!(build_strategy(&config).name(), "RSI Cross");

        config.strategy.kind = StrategyKind::VolumeDelta;
        assert_eq!(build_strategy(&config).name(), "Volume Delta");
    }
}
