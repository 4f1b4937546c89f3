use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::OrderConfig;
use crate::execution::engine::{EngineEvent, StrategyEngine};
use crate::execution::executor::{close_with_timeout, submit_with_timeout, OrderAck, OrderGateway};
use crate::execution::position_manager::Position;
use crate::models::{ClosedPosition, Signal, TradeEvent};
use crate::persistence::{TradeRecorder, TradeStore};
use crate::Result;

/// What a runner did before its feed ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub trades: usize,
    pub candles: usize,
    pub entries: usize,
    pub closed: usize,
    /// Position left open at shutdown
    pub open_position: Option<Position>,
}

/// Drives one `StrategyEngine` from a shared trade feed
///
/// Orders and trade persistence run in spawned tasks; entry results come back through a
/// channel, so a slow exchange never blocks ingestion.
pub struct Runner<G, S> {
    engine: StrategyEngine,
    gateway: Arc<G>,
    recorder: Arc<TradeRecorder<S>>,
    order_size: u64,
    order_timeout: Duration,
}

impl<G, S> Runner<G, S>
where
    G: OrderGateway + 'static,
    S: TradeStore + 'static,
{
    pub fn new(
        engine: StrategyEngine,
        gateway: Arc<G>,
        recorder: Arc<TradeRecorder<S>>,
        orders: &OrderConfig,
    ) -> Self {
        Self {
            engine,
            gateway,
            recorder,
            order_size: orders.size,
            order_timeout: Duration::from_secs(orders.timeout_secs),
        }
    }

    /// Consume trades until the feed closes, then wait for in-flight work and shut down
    pub async fn run(mut self, mut trades: broadcast::Receiver<TradeEvent>) -> RunSummary {
        let (result_tx, mut result_rx) = mpsc::channel::<Result<OrderAck>>(8);
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        tracing::info!("[{}] Runner started ({})", self.engine.label(), self.engine.strategy_name());

        loop {
            tokio::select! {
                biased;

                Some(result) = result_rx.recv() => {
                    let events = self.engine.on_order_result(result);
                    self.dispatch(events, &result_tx, &mut tasks, &mut summary);
                }
                received = trades.recv() => match received {
                    Ok(trade) => {
                        summary.trades += 1;
                        let events = self.engine.on_trade(&trade);
                        self.dispatch(events, &result_tx, &mut tasks, &mut summary);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("[{}] Feed lagged, {} trades skipped", self.engine.label(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("[{}] Background task failed: {}", self.engine.label(), e);
                    }
                }
            }
        }

        // Feed is gone; settle outstanding orders and writes
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("[{}] Background task failed: {}", self.engine.label(), e);
            }
        }
        while let Ok(result) = result_rx.try_recv() {
            let events = self.engine.on_order_result(result);
            self.dispatch(events, &result_tx, &mut tasks, &mut summary);
        }
        while tasks.join_next().await.is_some() {}

        summary.open_position = self.engine.shutdown();
        self.recorder.flush().await;

        tracing::info!(
            "[{}] Runner stopped: {} trades, {} candles, {} entries, {} closed",
            self.engine.label(),
            summary.trades,
            summary.candles,
            summary.entries,
            summary.closed
        );
        summary
    }

    fn dispatch(
        &self,
        events: Vec<EngineEvent>,
        result_tx: &mpsc::Sender<Result<OrderAck>>,
        tasks: &mut JoinSet<()>,
        summary: &mut RunSummary,
    ) {
        for event in events {
            match event {
                EngineEvent::CandleSealed(_) => summary.candles += 1,
                EngineEvent::EntryRequested(signal) => self.spawn_entry(signal, result_tx.clone(), tasks),
                EngineEvent::PositionOpened(_) => summary.entries += 1,
                EngineEvent::TrailAdvanced(_) => {}
                EngineEvent::PositionClosed(closed) => {
                    summary.closed += 1;
                    self.spawn_exit(closed, tasks);
                }
            }
        }
    }

    fn spawn_entry(&self, signal: Signal, result_tx: mpsc::Sender<Result<OrderAck>>, tasks: &mut JoinSet<()>) {
        let gateway = Arc::clone(&self.gateway);
        let size = self.order_size;
        let timeout = self.order_timeout;

        tasks.spawn(async move {
            let result = submit_with_timeout(gateway.as_ref(), signal.direction.entry_side(), size, timeout).await;
            if result_tx.send(result).await.is_err() {
                tracing::debug!("Entry result dropped, runner already stopped");
            }
        });
    }

    fn spawn_exit(&self, closed: ClosedPosition, tasks: &mut JoinSet<()>) {
        let gateway = Arc::clone(&self.gateway);
        let recorder = Arc::clone(&self.recorder);
        let label = self.engine.label().to_string();
        let size = self.order_size;
        let timeout = self.order_timeout;

        tasks.spawn(async move {
            if let Err(e) = close_with_timeout(gateway.as_ref(), closed.direction, size, timeout).await {
                tracing::warn!("[{}] Close order for {} failed: {}", label, closed.direction, e);
            }
            if let Err(e) = recorder.record(&label, &closed).await {
                tracing::warn!("[{}] Trade not yet persisted: {}", label, e);
            }
        });
    }
}
