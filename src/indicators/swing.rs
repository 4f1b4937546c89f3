use rust_decimal::Decimal;

use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwingKind {
    High,
    Low,
}

/// A local extreme in the candle series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    /// Position within the series the point was detected on
    pub index: usize,
    pub price: Decimal,
    pub kind: SwingKind,
}

impl SwingPoint {
    pub fn high(index: usize, price: Decimal) -> Self {
        Self {
            index,
            price,
            kind: SwingKind::High,
        }
    }

    pub fn low(index: usize, price: Decimal) -> Self {
        Self {
            index,
            price,
            kind: SwingKind::Low,
        }
    }
}

/// Detect swing highs
///
/// Index `i` qualifies when its high is strictly above each of the `lookback` highs to
/// the left and not exceeded by any of the `lookback` highs to the right. The last
/// `lookback` candles are never classified, so appending candles never changes an
/// existing classification.
pub fn detect_swing_highs(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    detect(candles, lookback, SwingKind::High)
}

/// Detect swing lows (mirror of [`detect_swing_highs`] on lows)
pub fn detect_swing_lows(candles: &[Candle], lookback: usize) -> Vec<SwingPoint> {
    detect(candles, lookback, SwingKind::Low)
}

fn detect(candles: &[Candle], lookback: usize, kind: SwingKind) -> Vec<SwingPoint> {
    if lookback == 0 || candles.len() < 2 * lookback + 1 {
        return Vec::new();
    }

    let value = |c: &Candle| match kind {
        SwingKind::High => c.high(),
        SwingKind::Low => c.low(),
    };
    // `beats(a, b)`: a is strictly more extreme than b
    let beats = |a: Decimal, b: Decimal| match kind {
        SwingKind::High => a > b,
        SwingKind::Low => a < b,
    };

    (lookback..candles.len() - lookback)
        .filter_map(|i| {
            let center = value(&candles[i]);
            let left_ok = candles[i - lookback..i]
                .iter()
                .all(|c| beats(center, value(c)));
            let right_ok = candles[i + 1..=i + lookback]
                .iter()
                .all(|c| !beats(value(c), center));

            (left_ok && right_ok).then_some(SwingPoint {
                index: i,
                price: center,
                kind,
            })
        })
        .collect()
}

/// Value of the line through two swing points at index `at`
pub fn line_value_at(first: &SwingPoint, second: &SwingPoint, at: usize) -> Decimal {
    if first.index == second.index {
        return second.price;
    }

    let run = Decimal::from(second.index as i64 - first.index as i64);
    let slope = (second.price - first.price) / run;
    first.price + slope * Decimal::from(at as i64 - first.index as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal::dec;

    fn create_test_candles(highs_lows: &[(i64, i64)]) -> Vec<Candle> {
        highs_lows
            .iter()
            .enumerate()
            .map(|(i, &(high, low))| {
                let mid = Decimal::from(high + low) / dec!(2);
                Candle::new(
                    DateTime::from_timestamp(i as i64 * 60, 0).unwrap(),
                    mid,
                    Decimal::from(high),
                    Decimal::from(low),
                    mid,
                    dec!(1),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_detects_single_peak() {
        let candles = create_test_candles(&[
            (10, 5),
            (11, 6),
            (12, 7),
            (15, 8),
            (12, 7),
            (11, 6),
            (10, 5),
        ]);

        let highs = detect_swing_highs(&candles, 3);
        assert_eq!(highs, vec![SwingPoint::high(3, dec!(15))]);
        assert!(detect_swing_lows(&candles, 3).is_empty());
    }

    #[test]
    fn test_equal_high_on_left_disqualifies() {
        let candles = create_test_candles(&[(15, 5), (11, 6), (12, 7), (15, 8), (12, 7), (11, 6), (10, 5)]);
        assert!(detect_swing_highs(&candles, 3).is_empty());
    }

    #[test]
    fn test_equal_high_on_right_is_allowed() {
        let candles = create_test_candles(&[(10, 5), (11, 6), (12, 7), (15, 8), (15, 7), (11, 6), (10, 5)]);
        let highs = detect_swing_highs(&candles, 3);
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 3);
    }

    #[test]
    fn test_swing_low() {
        let candles = create_test_candles(&[(20, 10), (19, 9), (18, 2), (19, 9), (20, 10)]);
        let lows = detect_swing_lows(&candles, 2);
        assert_eq!(lows, vec![SwingPoint::low(2, dec!(2))]);
    }

    #[test]
    fn test_last_lookback_candles_never_classified() {
        let candles = create_test_candles(&[(10, 5), (11, 6), (12, 7), (20, 8), (12, 7)]);
        // Index 3 only has one candle to its right
        assert!(detect_swing_highs(&candles, 2).is_empty());
    }

    #[test]
    fn test_line_value_at() {
        let first = SwingPoint::high(10, dec!(91000));
        let second = SwingPoint::high(14, dec!(90000));

        assert_eq!(line_value_at(&first, &second, 14), dec!(90000));
        assert_eq!(line_value_at(&first, &second, 15), dec!(89750));
        assert_eq!(line_value_at(&first, &second, 12), dec!(90500));
        assert_eq!(line_value_at(&second, &second, 20), dec!(90000));
    }
}
