use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::Result;

const RATE_LIMIT_RPM: u32 = 60;
const MAX_RETRIES: u32 = 3;

/// Resolutions the chart endpoint serves directly, in seconds
const NATIVE_RESOLUTIONS: [i64; 10] = [60, 180, 300, 900, 1_800, 3_600, 7_200, 14_400, 21_600, 86_400];

type HistoryRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Parallel OHLCV arrays as returned by the chart endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawHistory {
    #[serde(default)]
    pub s: String,
    #[serde(default)]
    pub t: Vec<i64>,
    #[serde(default)]
    pub o: Vec<Decimal>,
    #[serde(default)]
    pub h: Vec<Decimal>,
    #[serde(default)]
    pub l: Vec<Decimal>,
    #[serde(default)]
    pub c: Vec<Decimal>,
    #[serde(default)]
    pub v: Vec<Decimal>,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    result: RawHistory,
}

/// Largest native resolution that divides `interval_secs` evenly
///
/// 45m has no native resolution and is served as 15m candles, for example.
pub fn native_resolution(interval_secs: i64) -> Option<i64> {
    NATIVE_RESOLUTIONS
        .iter()
        .rev()
        .copied()
        .find(|&r| r <= interval_secs && interval_secs % r == 0)
}

/// Resolution parameter in the chart endpoint's own notation (minutes, or "1D")
pub fn resolution_param(resolution_secs: i64) -> String {
    if resolution_secs == 86_400 {
        "1D".to_string()
    } else {
        (resolution_secs / 60).to_string()
    }
}

/// Candle history client with rate limiting
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct HistoryClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<HistoryRateLimiter>,
}

impl HistoryClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let rpm = NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }

    /// Fetch raw candles for `[from, to]` (epoch seconds) at a native resolution
    pub async fn fetch(&self, symbol: &str, resolution_secs: i64, from: i64, to: i64) -> Result<RawHistory> {
        let url = format!("{}/v2/chart/history", self.base_url);
        let query = [
            ("symbol", symbol.to_string()),
            ("resolution", resolution_param(resolution_secs)),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ];

        let response = self.make_request(&url, &query).await?;
        let envelope: HistoryEnvelope = response.json().await?;
        let history = envelope.result;

        if history.s != "ok" {
            tracing::warn!("History request for {} returned status '{}'", symbol, history.s);
            return Ok(RawHistory::default());
        }

        tracing::debug!(
            "Fetched {} raw {}s candles for {}",
            history.t.len(),
            resolution_secs,
            symbol
        );

        Ok(history)
    }

    /// Make a rate-limited request, retrying with backoff on 429/5xx and network errors
    async fn make_request(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let mut attempt = 1;
        loop {
            self.rate_limiter.until_ready().await;
            let backoff = Duration::from_secs(2u64.pow(attempt));

            match self.client.get(url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    if (status.as_u16() == 429 || status.is_server_error()) && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "History endpoint returned {}, retrying in {}s (attempt {}/{})",
                            status,
                            backoff.as_secs(),
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(Error::Feed(format!("history request failed ({}): {}", status, body)));
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error: {}, retrying in {}s (attempt {}/{})",
                        e,
                        backoff.as_secs(),
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
