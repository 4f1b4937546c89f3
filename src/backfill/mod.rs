pub mod converter;
pub mod validator;

use chrono::{DateTime, Utc};

use crate::api::{native_resolution, HistoryClient};
use crate::config::AppConfig;
use crate::error::Error;
use crate::models::Candle;
use crate::Result;

pub use converter::CandleConverter;
pub use validator::CandleValidator;

/// Statistics from a backfill operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillStats {
    pub fetched_rows: usize,
    pub converted_candles: usize,
    pub resampled_candles: usize,
    pub validation_failures: usize,
}

/// Fetch the most recent closed candles for the configured interval
///
/// Intervals the chart endpoint does not serve are fetched at the largest dividing native
/// resolution and resampled. The still-forming candle is never returned.
pub async fn backfill(
    client: &HistoryClient,
    config: &AppConfig,
    now: DateTime<Utc>,
) -> Result<(Vec<Candle>, BackfillStats)> {
    let interval_secs = config.interval_secs()?;
    let resolution = native_resolution(interval_secs).ok_or_else(|| {
        Error::Config(format!(
            "no history resolution divides interval {}",
            config.market.interval
        ))
    })?;

    let wanted = config.market.history_candles as i64;
    let to = now.timestamp();
    // one extra bucket so the forming candle can be dropped without coming up short
    let from = to - (wanted + 1) * interval_secs;

    tracing::info!(
        "Backfilling {} {} candles for {} ({}s source resolution)",
        wanted,
        config.market.interval,
        config.market.symbol,
        resolution
    );

    let raw = client
        .fetch(&config.market.symbol, resolution, from, to)
        .await?;
    let mut stats = BackfillStats {
        fetched_rows: raw.t.len(),
        ..Default::default()
    };

    let source = CandleConverter::new(resolution).convert(&raw);
    stats.converted_candles = source.len();

    let resampled = CandleConverter::new(interval_secs).resample(&source, resolution);
    stats.resampled_candles = resampled.len();

    let validator = CandleValidator::new(interval_secs);
    let mut candles: Vec<Candle> = resampled
        .into_iter()
        .filter(|candle| match validator.validate(candle, now) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping history candle: {}", e);
                stats.validation_failures += 1;
                false
            }
        })
        .collect();

    let excess = candles.len().saturating_sub(config.market.history_candles);
    candles.drain(..excess);

    tracing::info!(
        "Backfill complete: {} rows -> {} candles ({} rejected)",
        stats.fetched_rows,
        candles.len(),
        stats.validation_failures
    );

    Ok((candles, stats))
}
