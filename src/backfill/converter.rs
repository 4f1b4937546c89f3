use chrono::DateTime;
use std::collections::BTreeMap;

use crate::api::RawHistory;
use crate::models::Candle;

/// Turns chart-history arrays into sorted candles and resamples them to the trading interval
///
/// History carries no taker split, so converted candles have zero buy volume.
pub struct CandleConverter {
    interval_secs: i64,
}

impl CandleConverter {
    /// Converter producing candles of `interval_secs`
    pub fn new(interval_secs: i64) -> Self {
        Self { interval_secs }
    }

    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// Zip the parallel arrays into candles, sorted by timestamp
    ///
    /// Rows with inconsistent OHLC values are skipped. Duplicate timestamps keep the last row.
    pub fn convert(&self, raw: &RawHistory) -> Vec<Candle> {
        let rows = raw
            .t
            .len()
            .min(raw.o.len())
            .min(raw.h.len())
            .min(raw.l.len())
            .min(raw.c.len())
            .min(raw.v.len());
        if rows < raw.t.len() {
            tracing::warn!(
                "History arrays have mismatched lengths, using first {} of {} rows",
                rows,
                raw.t.len()
            );
        }

        let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
        for i in 0..rows {
            let Some(bucket_start) = DateTime::from_timestamp(raw.t[i], 0) else {
                tracing::debug!("Skipping row with out-of-range timestamp {}", raw.t[i]);
                continue;
            };
            match Candle::new(bucket_start, raw.o[i], raw.h[i], raw.l[i], raw.c[i], raw.v[i]) {
                Ok(candle) => {
                    by_time.insert(raw.t[i], candle);
                }
                Err(e) => tracing::debug!("Skipping history row {}: {}", i, e),
            }
        }

        by_time.into_values().collect()
    }

    /// Merge sorted candles into buckets of this converter's interval
    ///
    /// Buckets are aligned to multiples of the interval. A bucket is emitted only when every
    /// source slot of it is present, so an incomplete trailing bucket is dropped.
    pub fn resample(&self, candles: &[Candle], source_secs: i64) -> Vec<Candle> {
        if source_secs <= 0 || self.interval_secs % source_secs != 0 {
            return Vec::new();
        }
        if source_secs == self.interval_secs {
            return candles.to_vec();
        }
        let per_bucket = (self.interval_secs / source_secs) as usize;

        let mut buckets: BTreeMap<i64, Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            let bucket = candle.timestamp().div_euclid(self.interval_secs) * self.interval_secs;
            buckets.entry(bucket).or_default().push(candle);
        }

        buckets
            .into_iter()
            .filter_map(|(bucket, parts)| {
                if parts.len() < per_bucket {
                    tracing::debug!(
                        "Dropping incomplete bucket {} ({}/{} parts)",
                        bucket,
                        parts.len(),
                        per_bucket
                    );
                    return None;
                }
                merge(bucket, &parts)
            })
            .collect()
    }
}

fn merge(bucket: i64, parts: &[&Candle]) -> Option<Candle> {
    let first = parts.first()?;
    let last = parts.last()?;
    let high = parts.iter().map(|c| c.high()).max()?;
    let low = parts.iter().map(|c| c.low()).min()?;
    let volume = parts.iter().map(|c| c.volume()).sum();
    let buy_volume = parts.iter().map(|c| c.buy_volume()).sum();

    Candle::new(
        DateTime::from_timestamp(bucket, 0)?,
        first.open(),
        high,
        low,
        last.close(),
        volume,
    )
    .and_then(|c| c.with_buy_volume(buy_volume))
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;
    use rust_decimal::Decimal;

    fn raw(rows: &[(i64, i64, i64, i64, i64, i64)]) -> RawHistory {
        RawHistory {
            s: "ok".to_string(),
            t: rows.iter().map(|r| r.0).collect(),
            o: rows.iter().map(|r| Decimal::from(r.1)).collect(),
            h: rows.iter().map(|r| Decimal::from(r.2)).collect(),
            l: rows.iter().map(|r| Decimal::from(r.3)).collect(),
            c: rows.iter().map(|r| Decimal::from(r.4)).collect(),
            v: rows.iter().map(|r| Decimal::from(r.5)).collect(),
        }
    }

    #[test]
    fn test_convert_empty_data() {
        let converter = CandleConverter::new(900);
        assert!(converter.convert(&RawHistory::default()).is_empty());
    }

    #[test]
    fn test_sort_out_of_order_timestamps() {
        let converter = CandleConverter::new(900);
        let candles = converter.convert(&raw(&[
            (1_800, 102, 103, 101, 102, 1),
            (0, 100, 101, 99, 100, 1),
            (900, 100, 102, 100, 102, 1),
        ]));

        let times: Vec<i64> = candles.iter().map(Candle::timestamp).collect();
        assert_eq!(times, vec![0, 900, 1_800]);
    }

    #[test]
    fn test_dedupe_duplicate_timestamps() {
        let converter = CandleConverter::new(900);
        let candles = converter.convert(&raw(&[
            (0, 100, 101, 99, 100, 1),
            (0, 100, 105, 99, 104, 2),
        ]));

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close(), dec!(104));
    }

    #[test]
    fn test_inconsistent_row_is_skipped() {
        let converter = CandleConverter::new(900);
        let candles = converter.convert(&raw(&[
            (0, 100, 99, 98, 100, 1), // high below open
            (900, 100, 101, 99, 100, 1),
        ]));

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp(), 900);
    }

    #[test]
    fn test_resample_three_15m_into_45m() {
        let converter = CandleConverter::new(2_700);
        let source = CandleConverter::new(900).convert(&raw(&[
            (2_700, 100, 104, 99, 103, 5),
            (3_600, 103, 108, 102, 106, 7),
            (4_500, 106, 107, 97, 98, 3),
        ]));

        let resampled = converter.resample(&source, 900);
        assert_eq!(resampled.len(), 1);

        let candle = &resampled[0];
        assert_eq!(candle.timestamp(), 2_700);
        assert_eq!(candle.open(), dec!(100));
        assert_eq!(candle.close(), dec!(98));
        assert_eq!(candle.high(), dec!(108));
        assert_eq!(candle.low(), dec!(97));
        assert_eq!(candle.volume(), dec!(15));
    }

    #[test]
    fn test_resample_drops_incomplete_trailing_bucket() {
        let converter = CandleConverter::new(2_700);
        let source = CandleConverter::new(900).convert(&raw(&[
            (0, 100, 101, 99, 100, 1),
            (900, 100, 101, 99, 100, 1),
            (1_800, 100, 101, 99, 100, 1),
            (2_700, 100, 101, 99, 100, 1),
            (3_600, 100, 101, 99, 100, 1),
        ]));

        let resampled = converter.resample(&source, 900);
        assert_eq!(resampled.len(), 1);
        assert_eq!(resampled[0].timestamp(), 0);
    }

    #[test]
    fn test_resample_same_resolution_is_identity() {
        let converter = CandleConverter::new(900);
        let source = converter.convert(&raw(&[(0, 100, 101, 99, 100, 1)]));
        assert_eq!(converter.resample(&source, 900), source);
    }

    #[test]
    fn test_resample_rejects_non_dividing_source() {
        let converter = CandleConverter::new(2_700);
        let source = CandleConverter::new(600).convert(&raw(&[(0, 100, 101, 99, 100, 1)]));
        assert!(converter.resample(&source, 600).is_empty());
    }
}
