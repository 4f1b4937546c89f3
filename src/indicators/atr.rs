/// Average True Range (ATR) indicator
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first candle of a series has no previous close, so its TR is the plain range.
/// ATR is the simple mean of the last `length` true ranges.
use rust_decimal::Decimal;

use crate::models::Candle;

/// True range of every candle, aligned with `candles`
pub fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let prev_close = i.checked_sub(1).map(|p| candles[p].close());
            candle.true_range(prev_close)
        })
        .collect()
}

/// Calculate ATR for the given candles
///
/// Returns the current ATR value, or None until `length` candles exist
pub fn calculate_atr(candles: &[Candle], length: usize) -> Option<Decimal> {
    if length == 0 || candles.len() < length {
        return None;
    }

    let start = candles.len() - length;
    let sum: Decimal = (start..candles.len())
        .map(|i| {
            let prev_close = i.checked_sub(1).map(|p| candles[p].close());
            candles[i].true_range(prev_close)
        })
        .sum();

    Some(sum / Decimal::from(length))
}
