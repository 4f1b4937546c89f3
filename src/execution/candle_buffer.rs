use crate::error::Error;
use crate::models::Candle;
use crate::Result;
use chrono::Duration;
use std::collections::VecDeque;

/// Bounded, fixed-spacing history of sealed candles
///
/// Bucket timestamps are strictly increasing and exactly `interval_secs` apart.
/// Holes left by quiet periods are filled with flat candles carrying the previous close.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: VecDeque<Candle>,
    interval_secs: i64,
    max_candles: usize,
}

impl CandleSeries {
    /// Create an empty series
    ///
    /// # Arguments
    /// * `interval_secs` - Spacing between consecutive buckets
    /// * `max_candles` - Maximum number of candles to keep; the oldest is evicted first
    pub fn new(interval_secs: i64, max_candles: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(max_candles + 1),
            interval_secs,
            max_candles,
        }
    }

    /// Append a sealed candle
    ///
    /// Returns the number of flat candles inserted to close a gap. Candles that are not
    /// strictly after the last bucket are rejected with `StaleData`; candles off the
    /// interval grid are rejected with `Feed`.
    pub fn push(&mut self, candle: Candle) -> Result<usize> {
        let mut filled = 0;

        if let Some(last) = self.candles.back() {
            let last_ts = last.timestamp();
            let ts = candle.timestamp();

            if ts <= last_ts {
                return Err(Error::StaleData {
                    bucket: ts,
                    open_bucket: last_ts,
                });
            }
            if (ts - last_ts) % self.interval_secs != 0 {
                return Err(Error::Feed(format!(
                    "candle at {} is off the {}s grid anchored at {}",
                    ts, self.interval_secs, last_ts
                )));
            }

            let prev_close = last.close();
            let missing = (ts - last_ts) / self.interval_secs - 1;
            // Fillers beyond max_candles would be evicted straight away
            let skipped = (missing - self.max_candles as i64).max(0);
            let mut bucket =
                last.bucket_start() + Duration::seconds(self.interval_secs * (1 + skipped));
            while bucket < candle.bucket_start() {
                self.candles.push_back(Candle::flat(bucket, prev_close));
                bucket += Duration::seconds(self.interval_secs);
                filled += 1;
            }

            if filled > 0 {
                tracing::debug!(
                    "Filled {} empty bucket(s) before {}",
                    filled,
                    candle.bucket_start()
                );
            }
        }

        self.candles.push_back(candle);

        while self.candles.len() > self.max_candles {
            self.candles.pop_front();
        }
        self.candles.make_contiguous();

        Ok(filled)
    }

    /// All candles, oldest first
    pub fn as_slice(&self) -> &[Candle] {
        // `push` keeps the ring buffer contiguous
        self.candles.as_slices().0
    }

    /// The `n` most recent candles, oldest first
    pub fn recent(&self, n: usize) -> &[Candle] {
        let all = self.as_slice();
        &all[all.len().saturating_sub(n)..]
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Index of the most recent candle
    pub fn last_index(&self) -> Option<usize> {
        self.candles.len().checked_sub(1)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    pub fn max_candles(&self) -> usize {
        self.max_candles
    }
}
