use rust_decimal::Decimal;

use crate::models::Candle;

/// Calculate Simple Moving Average (SMA) of the last `period` values
pub fn calculate_sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period))
}

/// Mean volume of the last `window` candles, the most recent one included
pub fn volume_ma(candles: &[Candle], window: usize) -> Option<Decimal> {
    if window == 0 || candles.len() < window {
        return None;
    }

    let sum: Decimal = candles.iter().rev().take(window).map(Candle::volume).sum();
    Some(sum / Decimal::from(window))
}
