use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Error;
use crate::Result;

const ENV_PREFIX: &str = "CANDLEBOT";

/// Full runtime configuration for one strategy instance
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `CANDLEBOT__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub indicators: IndicatorConfig,
    pub strategy: StrategyConfig,
    pub exit: ExitConfig,
    pub orders: OrderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub symbol: String,
    pub product_id: u64,
    /// Candle width, e.g. "1m", "15m", "45m", "1h"
    pub interval: String,
    /// Sealed candles kept in memory; older ones are evicted
    pub max_candles: usize,
    /// Trades replayed from a reconnect snapshot
    pub snapshot_tail: usize,
    /// Candles requested from the history endpoint at startup (0 disables backfill)
    pub history_candles: usize,
    pub history_base_url: String,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSD".to_string(),
            product_id: 27,
            interval: "15m".to_string(),
            max_candles: 200,
            snapshot_tail: 5,
            history_candles: 100,
            history_base_url: "https://cdn.india.deltaex.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub swing_lookback: usize,
    pub atr_length: usize,
    pub volume_ma_window: usize,
    pub rsi_period: usize,
    pub rsi_smoothing_length: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            swing_lookback: 3,
            atr_length: 14,
            volume_ma_window: 20,
            rsi_period: 14,
            rsi_smoothing_length: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Trendline,
    Rsi,
    VolumeDelta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub trendline: TrendlineConfig,
    pub rsi: RsiConfig,
    pub volume_delta: VolumeDeltaConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: StrategyKind::Trendline,
            trendline: TrendlineConfig::default(),
            rsi: RsiConfig::default(),
            volume_delta: VolumeDeltaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendlineConfig {
    /// Breakout volume must exceed this multiple of the volume MA
    pub volume_multiplier: Decimal,
    pub atr_stop_multiplier: Decimal,
    pub atr_target_multiplier: Decimal,
    /// Candles required before the strategy evaluates at all
    pub min_candles: usize,
}

impl Default for TrendlineConfig {
    fn default() -> Self {
        Self {
            volume_multiplier: Decimal::new(12, 1),
            atr_stop_multiplier: Decimal::ONE,
            atr_target_multiplier: Decimal::new(3, 0),
            min_candles: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub oversold: Decimal,
    pub overbought: Decimal,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            oversold: Decimal::new(30, 0),
            overbought: Decimal::new(70, 0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeDeltaConfig {
    /// Minimum |buy - sell| taker volume per confirming candle
    pub min_delta: Decimal,
    /// Minimum share (percent) of the dominant side
    pub min_side_pct: Decimal,
    pub consecutive_candles: usize,
    /// Stop distance in percent of entry
    pub stop_loss_pct: Decimal,
    /// Target distance in percent of entry
    pub take_profit_pct: Decimal,
}

impl Default for VolumeDeltaConfig {
    fn default() -> Self {
        Self {
            min_delta: Decimal::new(150, 0),
            min_side_pct: Decimal::new(60, 0),
            consecutive_candles: 2,
            stop_loss_pct: Decimal::new(15, 2),
            take_profit_pct: Decimal::new(6, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitMode {
    /// Ratchet the stop each time a profit multiple is reached
    Trailing,
    /// Single stop and single target
    Fixed,
}

/// Where the next trailing target is measured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailBasis {
    /// `entry ± level × risk_unit`
    Entry,
    /// `stop ± (first_target_level + 1) × risk_unit`, re-anchored after each ratchet
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub mode: ExitMode,
    pub first_target_level: u32,
    /// Share of the reached profit locked in as the new stop
    pub trail_lock_pct: Decimal,
    pub trail_basis: TrailBasis,
    pub max_hold_minutes: Option<u64>,
    /// Opposing candle delta that forces an exit
    pub delta_reversal_threshold: Option<Decimal>,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            mode: ExitMode::Trailing,
            first_target_level: 2,
            trail_lock_pct: Decimal::new(6, 1),
            trail_basis: TrailBasis::Entry,
            max_hold_minutes: None,
            delta_reversal_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    /// Contracts per order
    pub size: u64,
    pub timeout_secs: u64,
    /// Fill locally instead of calling the exchange
    pub paper: bool,
    pub base_url: String,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            size: 10,
            timeout_secs: 30,
            paper: true,
            base_url: "https://cdn-ind.testnet.deltaex.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Json,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub json_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            json_path: "trades.json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (if given and present), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        tracing::debug!(?config, "Configuration loaded");

        Ok(config)
    }

    /// The same configuration running on a different candle width
    pub fn with_interval(&self, interval: &str) -> Result<Self> {
        let mut config = self.clone();
        config.market.interval = interval.to_string();
        config.validate()?;
        Ok(config)
    }

    pub fn interval_secs(&self) -> Result<i64> {
        parse_interval_secs(&self.market.interval)
    }

    /// Short label used in trade records and logs, e.g. "rsi-45m"
    pub fn strategy_label(&self) -> String {
        let kind = match self.strategy.kind {
            StrategyKind::Trendline => "trendline",
            StrategyKind::Rsi => "rsi",
            StrategyKind::VolumeDelta => "volume-delta",
        };
        format!("{}-{}", kind, self.market.interval)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.interval_secs()?;

        let ind = &self.indicators;
        if ind.swing_lookback == 0
            || ind.atr_length == 0
            || ind.volume_ma_window == 0
            || ind.rsi_period == 0
            || ind.rsi_smoothing_length == 0
        {
            return Err(Error::Config(
                "indicator windows must all be greater than zero".to_string(),
            ));
        }

        let required = [
            2 * ind.swing_lookback + 2,
            ind.atr_length,
            ind.volume_ma_window,
            ind.rsi_period + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if self.market.max_candles < required {
            return Err(Error::Config(format!(
                "max_candles {} is below the {} candles the indicators need",
                self.market.max_candles, required
            )));
        }

        let rsi = &self.strategy.rsi;
        let hundred = Decimal::ONE_HUNDRED;
        if rsi.oversold <= Decimal::ZERO || rsi.overbought >= hundred || rsi.oversold >= rsi.overbought
        {
            return Err(Error::Config(format!(
                "rsi thresholds must satisfy 0 < oversold ({}) < overbought ({}) < 100",
                rsi.oversold, rsi.overbought
            )));
        }

        if self.strategy.volume_delta.consecutive_candles == 0 {
            return Err(Error::Config(
                "volume_delta.consecutive_candles must be at least 1".to_string(),
            ));
        }

        let exit = &self.exit;
        if exit.trail_lock_pct <= Decimal::ZERO || exit.trail_lock_pct > Decimal::ONE {
            return Err(Error::Config(format!(
                "trail_lock_pct {} must be in (0, 1]",
                exit.trail_lock_pct
            )));
        }
        if exit.first_target_level == 0 {
            return Err(Error::Config(
                "first_target_level must be at least 1".to_string(),
            ));
        }
        if exit.mode == ExitMode::Fixed && self.strategy.kind == StrategyKind::Rsi {
            return Err(Error::Config(
                "fixed exits need a target; the rsi strategy only sets a stop".to_string(),
            ));
        }

        if self.orders.size == 0 || self.orders.timeout_secs == 0 {
            return Err(Error::Config(
                "orders.size and orders.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse an interval string ("30s", "15m", "45m", "4h", "1d") into seconds
pub fn parse_interval_secs(s: &str) -> Result<i64> {
    if s.len() < 2 {
        return Err(Error::Config(format!(
            "invalid interval '{}': expected format like '15m'",
            s
        )));
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let n: i64 = num_str.parse().map_err(|_| {
        Error::Config(format!(
            "invalid interval '{}': quantity must be a positive integer",
            s
        ))
    })?;
    if n <= 0 {
        return Err(Error::Config(format!(
            "invalid interval '{}': quantity must be > 0",
            s
        )));
    }

    let unit_secs = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => {
            return Err(Error::Config(format!(
                "invalid interval '{}': unsupported suffix '{}', expected one of s/m/h/d",
                s, suffix
            )))
        }
    };

    n.checked_mul(unit_secs)
        .ok_or_else(|| Error::Config(format!("invalid interval '{}': value is too large", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval_secs("45m").unwrap(), 2_700);
        assert_eq!(parse_interval_secs("15m").unwrap(), 900);
        assert_eq!(parse_interval_secs("1h").unwrap(), 3_600);
        assert_eq!(parse_interval_secs("30s").unwrap(), 30);
        assert_eq!(parse_interval_secs("1d").unwrap(), 86_400);
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(parse_interval_secs("").is_err());
        assert!(parse_interval_secs("m").is_err());
        assert!(parse_interval_secs("0m").is_err());
        assert!(parse_interval_secs("-5m").is_err());
        assert!(parse_interval_secs("5x").is_err());
        assert!(parse_interval_secs("abcm").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.interval_secs().unwrap(), 900);
        assert_eq!(config.strategy_label(), "trendline-15m");
    }

    #[test]
    fn test_invalid_interval_is_fatal() {
        let mut config = AppConfig::default();
        config.market.interval = "15q".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_with_interval() {
        let config = AppConfig::default().with_interval("45m").unwrap();
        assert_eq!(config.interval_secs().unwrap(), 2_700);
        assert!(AppConfig::default().with_interval("nope").is_err());
    }

    #[test]
    fn test_rsi_thresholds_must_be_ordered() {
        let mut config = AppConfig::default();
        config.strategy.rsi.oversold = Decimal::new(80, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trail_lock_pct_bounds() {
        let mut config = AppConfig::default();
        config.exit.trail_lock_pct = Decimal::new(15, 1);
        assert!(config.validate().is_err());

        config.exit.trail_lock_pct = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_exit_requires_target_strategy() {
        let mut config = AppConfig::default();
        config.strategy.kind = StrategyKind::Rsi;
        config.exit.mode = ExitMode::Fixed;
        assert!(config.validate().is_err());

        config.strategy.kind = StrategyKind::Trendline;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_max_candles_must_cover_indicators() {
        let mut config = AppConfig::default();
        config.market.max_candles = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.toml");
        std::fs::write(
            &path,
            r#"
[market]
interval = "45m"

[strategy]
kind = "rsi"

[exit]
trail_lock_pct = 0.5
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.market.interval, "45m");
        assert_eq!(config.strategy.kind, StrategyKind::Rsi);
        assert_eq!(config.exit.trail_lock_pct, Decimal::new(5, 1));
        // Untouched sections keep their defaults
        assert_eq!(config.indicators.rsi_period, 14);
    }
}
