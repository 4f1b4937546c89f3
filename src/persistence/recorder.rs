use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::models::{ClosedPosition, TradeRecord};
use crate::persistence::TradeStore;
use crate::Result;

/// Summary over the stored trade log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percentage, 0 for an empty log
    pub win_rate: Decimal,
    pub total_pnl: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    /// Gross profit over gross loss, 0 when nothing was lost
    pub profit_factor: Decimal,
    pub expectancy: Decimal,
}

impl TradeStats {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let total_trades = records.len();
        if total_trades == 0 {
            return Self::default();
        }

        let (wins, losses): (Vec<&TradeRecord>, Vec<&TradeRecord>) = records.iter().partition(|r| r.is_win);
        let gross_profit: Decimal = wins.iter().map(|r| r.pnl).sum();
        let gross_loss: Decimal = losses.iter().map(|r| r.pnl).sum();

        let avg = |sum: Decimal, n: usize| {
            if n == 0 {
                Decimal::ZERO
            } else {
                sum / Decimal::from(n)
            }
        };
        let avg_win = avg(gross_profit, wins.len());
        let avg_loss = avg(gross_loss, losses.len());

        let win_fraction = Decimal::from(wins.len()) / Decimal::from(total_trades);
        let profit_factor = if gross_loss.is_zero() {
            Decimal::ZERO
        } else {
            (gross_profit / gross_loss).abs()
        };

        Self {
            total_trades,
            wins: wins.len(),
            losses: losses.len(),
            win_rate: (win_fraction * Decimal::ONE_HUNDRED).round_dp(2),
            total_pnl: gross_profit + gross_loss,
            avg_win: avg_win.round_dp(2),
            avg_loss: avg_loss.round_dp(2),
            profit_factor: profit_factor.round_dp(2),
            expectancy: (win_fraction * avg_win - (Decimal::ONE - win_fraction) * avg_loss.abs()).round_dp(2),
        }
    }
}

/// Turns closed positions into persisted trade records
///
/// Shared between strategy instances behind an `Arc`. Ids come from an atomic counter seeded
/// with the store's `next_id`, so they keep increasing even if stored records are pruned.
/// Appends that fail are queued and retried before the next append and on `flush`.
pub struct TradeRecorder<S> {
    store: S,
    next_id: AtomicU64,
    pending: Mutex<Vec<TradeRecord>>,
}

impl<S: TradeStore> TradeRecorder<S> {
    pub async fn new(store: S) -> Result<Self> {
        let next_id = store.next_id().await?;
        tracing::debug!("Trade recorder starting at id {}", next_id);
        Ok(Self {
            store,
            next_id: AtomicU64::new(next_id),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn allocate_id(&self) -> u64 {
        let mut current = self.next_id.load(Ordering::Acquire);
        loop {
            match self
                .next_id
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(id) => return id,
                Err(actual) => current = actual,
            }
        }
    }

    /// Assign an id and persist the record
    ///
    /// On a store failure the record is queued and `Error::Persistence` is returned; it is not
    /// lost.
    pub async fn record(&self, strategy: &str, closed: &ClosedPosition) -> Result<TradeRecord> {
        let record = TradeRecord::from_closed(self.allocate_id(), strategy, closed);

        let mut pending = self.pending.lock().await;
        self.retry_pending(&mut pending).await;

        match self.store.append(&record).await {
            Ok(()) => {
                tracing::info!(
                    "Trade #{} recorded: {} {} pnl {} ({})",
                    record.trade_id,
                    record.strategy,
                    record.direction,
                    record.pnl,
                    record.exit_reason
                );
                Ok(record)
            }
            Err(e) => {
                tracing::warn!("Trade #{} queued for retry: {}", record.trade_id, e);
                pending.push(record);
                Err(Error::Persistence(e.to_string()))
            }
        }
    }

    async fn retry_pending(&self, pending: &mut Vec<TradeRecord>) {
        if pending.is_empty() {
            return;
        }
        let queued = std::mem::take(pending);
        for record in queued {
            match self.store.append(&record).await {
                Ok(()) => tracing::info!("Trade #{} persisted on retry", record.trade_id),
                Err(e) => {
                    tracing::warn!("Retry of trade #{} failed: {}", record.trade_id, e);
                    pending.push(record);
                }
            }
        }
    }

    /// Retry every queued record, returning how many are still queued
    pub async fn flush(&self) -> usize {
        let mut pending = self.pending.lock().await;
        self.retry_pending(&mut pending).await;
        if !pending.is_empty() {
            tracing::warn!("{} trade records could not be persisted", pending.len());
        }
        pending.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn stats(&self) -> Result<TradeStats> {
        let records = self.store.list().await?;
        Ok(TradeStats::from_records(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, ExitReason};
    use crate::persistence::JsonTradeStore;
    use chrono::DateTime;
    use rust_decimal::dec;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// In-memory store that can be told to fail
    #[derive(Default)]
    struct FlakyStore {
        records: std::sync::Mutex<Vec<TradeRecord>>,
        failing: AtomicBool,
    }

    impl TradeStore for FlakyStore {
        async fn append(&self, record: &TradeRecord) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Persistence("disk full".to_string()));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<TradeRecord>> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn closed(entry: Decimal, exit: Decimal) -> ClosedPosition {
        ClosedPosition {
            direction: Direction::Long,
            entry_price: entry,
            exit_price: exit,
            entry_time: DateTime::from_timestamp(0, 0).unwrap(),
            exit_time: DateTime::from_timestamp(900, 0).unwrap(),
            stop_loss: entry - dec!(500),
            initial_stop: entry - dec!(500),
            risk_unit: dec!(500),
            max_trail_reached: 0,
            exit_reason: ExitReason::StopLoss,
        }
    }

    #[tokio::test]
    async fn test_ids_continue_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTradeStore::new(dir.path().join("trades.json"));
        store
            .append(&TradeRecord::from_closed(41, "seed", &closed(dec!(100), dec!(99))))
            .await
            .unwrap();

        let recorder = TradeRecorder::new(store).await.unwrap();
        let record = recorder.record("rsi-45m", &closed(dec!(90000), dec!(90600))).await.unwrap();
        assert_eq!(record.trade_id, 42);
        assert_eq!(record.pnl, dec!(600));
    }

    #[tokio::test]
    async fn test_concurrent_records_get_unique_ids() {
        let recorder = Arc::new(TradeRecorder::new(FlakyStore::default()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..8 {
            let recorder = Arc::clone(&recorder);
            handles.push(tokio::spawn(async move {
                recorder
                    .record(&format!("s{}", i), &closed(dec!(100), dec!(101)))
                    .await
                    .unwrap()
                    .trade_id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_failed_append_is_queued_and_retried() {
        let recorder = TradeRecorder::new(FlakyStore::default()).await.unwrap();
        recorder.store().failing.store(true, Ordering::SeqCst);

        let result = recorder.record("x", &closed(dec!(100), dec!(99))).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(recorder.pending_count().await, 1);
        assert_eq!(recorder.flush().await, 1);

        recorder.store().failing.store(false, Ordering::SeqCst);
        recorder.record("x", &closed(dec!(100), dec!(101))).await.unwrap();

        let ids: Vec<u64> = recorder.store().list().await.unwrap().iter().map(|r| r.trade_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(recorder.pending_count().await, 0);
    }

    #[test]
    fn test_stats_summary() {
        let records = vec![
            TradeRecord::from_closed(1, "x", &closed(dec!(100), dec!(110))),
            TradeRecord::from_closed(2, "x", &closed(dec!(100), dec!(95))),
            TradeRecord::from_closed(3, "x", &closed(dec!(100), dec!(120))),
            TradeRecord::from_closed(4, "x", &closed(dec!(100), dec!(95))),
        ];

        let stats = TradeStats::from_records(&records);
        assert_eq!(stats.total_trades, 4);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 2);
        assert_eq!(stats.win_rate, dec!(50));
        assert_eq!(stats.total_pnl, dec!(20));
        assert_eq!(stats.avg_win, dec!(15));
        assert_eq!(stats.avg_loss, dec!(-5));
        assert_eq!(stats.profit_factor, dec!(3));
        assert_eq!(stats.expectancy, dec!(5));
    }

    #[test]
    fn test_stats_empty() {
        assert_eq!(TradeStats::from_records(&[]), TradeStats::default());
    }
}
