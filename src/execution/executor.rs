use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::api::DeltaOrderClient;
use crate::error::Error;
use crate::models::{Direction, OrderSide};
use crate::Result;

/// Body of a market order request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub product_id: u64,
    pub size: u64,
    pub side: OrderSide,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    MarketOrder,
}

impl OrderRequest {
    pub fn market(product_id: u64, size: u64, side: OrderSide) -> Self {
        Self {
            product_id,
            size,
            side,
            order_type: OrderType::MarketOrder,
        }
    }
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: String,
}

/// Places market orders for one instrument
///
/// Any non-success response maps to `Error::OrderRejected`.
pub trait OrderGateway: Send + Sync {
    fn place_market_order(
        &self,
        side: OrderSide,
        size: u64,
    ) -> impl Future<Output = Result<OrderAck>> + Send;

    /// Flatten a position by trading the opposite side
    fn close_position(
        &self,
        direction: Direction,
        size: u64,
    ) -> impl Future<Output = Result<OrderAck>> + Send {
        self.place_market_order(direction.exit_side(), size)
    }
}

/// Fills every order instantly without touching the exchange
#[derive(Debug, Default)]
pub struct PaperGateway {
    next_id: AtomicU64,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderGateway for PaperGateway {
    async fn place_market_order(&self, side: OrderSide, size: u64) -> Result<OrderAck> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("Paper {:?} x {} filled (paper-{})", side, size, id);
        Ok(OrderAck {
            order_id: format!("paper-{}", id),
        })
    }
}

/// Paper or live order routing, picked at startup
pub enum Gateway {
    Paper(PaperGateway),
    Live(DeltaOrderClient),
}

impl OrderGateway for Gateway {
    async fn place_market_order(&self, side: OrderSide, size: u64) -> Result<OrderAck> {
        match self {
            Gateway::Paper(gateway) => gateway.place_market_order(side, size).await,
            Gateway::Live(gateway) => gateway.place_market_order(side, size).await,
        }
    }
}

/// Place an order, giving up after `timeout`
pub async fn submit_with_timeout<G: OrderGateway>(
    gateway: &G,
    side: OrderSide,
    size: u64,
    timeout: Duration,
) -> Result<OrderAck> {
    match tokio::time::timeout(timeout, gateway.place_market_order(side, size)).await {
        Ok(result) => result,
        Err(_) => Err(Error::OrderTimeout(timeout.as_secs())),
    }
}

/// Flatten a position, giving up after `timeout`
pub async fn close_with_timeout<G: OrderGateway>(
    gateway: &G,
    direction: Direction,
    size: u64,
    timeout: Duration,
) -> Result<OrderAck> {
    match tokio::time::timeout(timeout, gateway.close_position(direction, size)).await {
        Ok(result) => result,
        Err(_) => Err(Error::OrderTimeout(timeout.as_secs())),
    }
}
