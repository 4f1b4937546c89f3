use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Added to the average loss so a run of pure gains does not divide by zero
const LOSS_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 10);

/// Calculate Relative Strength Index (RSI) with Wilder's smoothing
///
/// The first average gain/loss is the simple mean of the first `period` closing deltas;
/// every later delta is folded in as `(avg * (period - 1) + x) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
pub fn calculate_rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let period_dec = Decimal::from(period);
    let (gains, losses): (Vec<Decimal>, Vec<Decimal>) = closes
        .windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            if change > Decimal::ZERO {
                (change, Decimal::ZERO)
            } else {
                (Decimal::ZERO, -change)
            }
        })
        .unzip();

    let mut avg_gain: Decimal = gains[..period].iter().sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = losses[..period].iter().sum::<Decimal>() / period_dec;

    let carry = period_dec - Decimal::ONE;
    for i in period..gains.len() {
        avg_gain = (avg_gain * carry + gains[i]) / period_dec;
        avg_loss = (avg_loss * carry + losses[i]) / period_dec;
    }

    let rs = avg_gain / (avg_loss + LOSS_EPSILON);
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// One RSI update: the raw Wilder value and the smoothed line used for signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiReading {
    pub raw: Decimal,
    pub value: Decimal,
    /// Smoothed value from the previous sealed candle
    pub previous: Option<Decimal>,
}

/// Keeps the raw RSI history needed for the SMA-smoothed line
///
/// Until `smoothing_length` raw values exist the raw value stands in for the smoothed one.
#[derive(Debug, Clone)]
pub struct RsiTracker {
    period: usize,
    smoothing_length: usize,
    history: VecDeque<Decimal>,
    current: Option<Decimal>,
}

impl RsiTracker {
    pub fn new(period: usize, smoothing_length: usize) -> Self {
        Self {
            period,
            smoothing_length,
            history: VecDeque::with_capacity(smoothing_length * 2),
            current: None,
        }
    }

    /// Fold the latest closing prices in; call once per sealed candle
    pub fn update(&mut self, closes: &[Decimal]) -> Option<RsiReading> {
        let previous = self.current.take();
        let raw = calculate_rsi(closes, self.period)?;

        self.history.push_back(raw);
        while self.history.len() > self.smoothing_length * 2 {
            self.history.pop_front();
        }

        let value = if self.smoothing_length > 0 && self.history.len() >= self.smoothing_length {
            let sum: Decimal = self.history.iter().rev().take(self.smoothing_length).sum();
            sum / Decimal::from(self.smoothing_length)
        } else {
            raw
        };

        self.current = Some(value);
        Some(RsiReading {
            raw,
            value,
            previous,
        })
    }

    pub fn current(&self) -> Option<Decimal> {
        self.current
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
