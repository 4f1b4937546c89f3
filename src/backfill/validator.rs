use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::models::Candle;
use crate::Result;

/// Sanity checks for history candles before they seed a series
///
/// OHLC ordering is already enforced by `Candle::new`; this covers what that cannot know.
pub struct CandleValidator {
    interval_secs: i64,
}

impl CandleValidator {
    pub fn new(interval_secs: i64) -> Self {
        Self { interval_secs }
    }

    /// Validate a candle against the bucket grid and the current time
    pub fn validate(&self, candle: &Candle, now: DateTime<Utc>) -> Result<()> {
        self.validate_prices(candle)?;
        self.validate_alignment(candle)?;
        self.validate_not_forming(candle, now)?;
        Ok(())
    }

    fn validate_prices(&self, candle: &Candle) -> Result<()> {
        if candle.low() <= rust_decimal::Decimal::ZERO {
            return Err(Error::Feed(format!(
                "non-positive price {} at {}",
                candle.low(),
                candle.bucket_start()
            )));
        }
        Ok(())
    }

    fn validate_alignment(&self, candle: &Candle) -> Result<()> {
        if candle.timestamp().rem_euclid(self.interval_secs) != 0 {
            return Err(Error::Feed(format!(
                "candle at {} is not aligned to {}s buckets",
                candle.bucket_start(),
                self.interval_secs
            )));
        }
        Ok(())
    }

    /// A bucket that has not ended yet is still forming and must not be seeded
    fn validate_not_forming(&self, candle: &Candle, now: DateTime<Utc>) -> Result<()> {
        if candle.timestamp() + self.interval_secs > now.timestamp() {
            return Err(Error::Feed(format!(
                "candle at {} has not closed yet",
                candle.bucket_start()
            )));
        }
        Ok(())
    }
}
