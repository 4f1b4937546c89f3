use chrono::DateTime;
use rust_decimal::Decimal;

use crate::error::Error;
use crate::models::{Candle, TradeEvent};
use crate::Result;

/// Folds trade events into fixed-interval candles
///
/// Only one candle is open at a time. A trade belonging to a later bucket seals it;
/// a trade belonging to an earlier bucket is dropped.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    interval_secs: i64,
    open: Option<Candle>,
    /// Last bucket already covered by sealed history
    floor: Option<i64>,
}

impl CandleAggregator {
    pub fn new(interval_secs: i64) -> Self {
        Self {
            interval_secs,
            open: None,
            floor: None,
        }
    }

    /// Reject trades for buckets up to and including `bucket_secs` (history seeded up to there)
    pub fn resume_after(&mut self, bucket_secs: i64) {
        self.floor = Some(bucket_secs);
    }

    /// Bucket start (epoch seconds) containing `ts_secs`
    pub fn bucket_of(&self, ts_secs: i64) -> i64 {
        ts_secs.div_euclid(self.interval_secs) * self.interval_secs
    }

    /// Fold one trade in
    ///
    /// Returns the sealed candle when the trade opens a new bucket. On error nothing is
    /// mutated.
    pub fn on_trade(&mut self, trade: &TradeEvent) -> Result<Option<Candle>> {
        if trade.price <= Decimal::ZERO || trade.size < Decimal::ZERO {
            return Err(Error::Feed(format!(
                "invalid trade price={} size={}",
                trade.price, trade.size
            )));
        }

        let bucket = self.bucket_of(trade.timestamp_secs());

        if let Some(floor) = self.floor {
            if bucket <= floor {
                return Err(Error::StaleData {
                    bucket,
                    open_bucket: floor,
                });
            }
        }

        match self.open.as_ref().map(Candle::timestamp) {
            Some(open_bucket) if bucket < open_bucket => Err(Error::StaleData {
                bucket,
                open_bucket,
            }),
            Some(open_bucket) if bucket == open_bucket => {
                if let Some(open) = self.open.as_mut() {
                    open.apply_trade(trade.price, trade.size, trade.is_taker_buy);
                }
                Ok(None)
            }
            _ => {
                let mut candle = Candle::opening(bucket_start(bucket)?, trade.price);
                candle.apply_trade(trade.price, trade.size, trade.is_taker_buy);
                Ok(self.open.replace(candle))
            }
        }
    }

    /// The in-progress candle, if any
    pub fn open_candle(&self) -> Option<&Candle> {
        self.open.as_ref()
    }

    /// Drop the in-progress candle without sealing it
    pub fn discard_open(&mut self) -> Option<Candle> {
        self.open.take()
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }
}

fn bucket_start(bucket_secs: i64) -> Result<DateTime<chrono::Utc>> {
    DateTime::from_timestamp(bucket_secs, 0)
        .ok_or_else(|| Error::Feed(format!("bucket {} is out of range", bucket_secs)))
}
