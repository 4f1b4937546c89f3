use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

use crate::error::Error;
use crate::execution::{OrderAck, OrderGateway, OrderRequest};
use crate::models::OrderSide;
use crate::Result;

const ORDERS_PATH: &str = "/v2/orders";

/// API credentials, read from `DELTA_API_KEY` / `DELTA_API_SECRET`
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("DELTA_API_KEY")
            .map_err(|_| Error::Config("DELTA_API_KEY is not set".to_string()))?;
        let api_secret = std::env::var("DELTA_API_SECRET")
            .map_err(|_| Error::Config("DELTA_API_SECRET is not set".to_string()))?;
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

/// Hex HMAC-SHA256 over `method + timestamp + path + payload`
pub fn sign(secret: &str, method: &str, timestamp: &str, path: &str, payload: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid api secret: {}", e)))?;
    mac.update(method.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(path.as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(default)]
    success: bool,
    result: Option<OrderResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct OrderResult {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

/// Signed market-order client for one product
pub struct DeltaOrderClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    product_id: u64,
}

impl DeltaOrderClient {
    pub fn new(base_url: &str, credentials: Credentials, product_id: u64) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            product_id,
        })
    }

    async fn post_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let payload = serde_json::to_string(request)?;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign(
            &self.credentials.api_secret,
            "POST",
            &timestamp,
            ORDERS_PATH,
            &payload,
        )?;

        tracing::info!(
            "Placing {:?} market order: product {} x {}",
            request.side,
            request.product_id,
            request.size
        );

        let response = self
            .client
            .post(format!("{}{}", self.base_url, ORDERS_PATH))
            .header("api-key", &self.credentials.api_key)
            .header("signature", signature)
            .header("timestamp", timestamp)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: OrderResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => {
                return Err(Error::OrderRejected {
                    code: status.as_u16().to_string(),
                    message: body,
                })
            }
        };

        match parsed {
            OrderResponse {
                success: true,
                result: Some(result),
                ..
            } => {
                let order_id = value_to_string(&result.id);
                tracing::info!("Order placed: {}", order_id);
                Ok(OrderAck { order_id })
            }
            OrderResponse { error, .. } => {
                let (code, message) = match error {
                    Some(e) => (value_to_string(&e.code), e.message.unwrap_or_default()),
                    None => (status.as_u16().to_string(), body),
                };
                tracing::warn!("Order rejected ({}): {}", code, message);
                Err(Error::OrderRejected { code, message })
            }
        }
    }
}

impl OrderGateway for DeltaOrderClient {
    async fn place_market_order(&self, side: OrderSide, size: u64) -> Result<OrderAck> {
        self.post_order(&OrderRequest::market(self.product_id, size, side))
            .await
    }
}
