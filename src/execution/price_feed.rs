use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

use crate::error::Error;
use crate::models::TradeEvent;
use crate::Result;

/// A number the exchange may send either as a JSON number or as a string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(serde_json::Number),
    Text(String),
}

impl Numeric {
    fn to_decimal(&self, field: &str) -> Result<Decimal> {
        let text = match self {
            Numeric::Number(n) => n.to_string(),
            Numeric::Text(s) => s.clone(),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| Error::Feed(format!("{} is not a number: {}", field, text)))
    }

    fn to_i64(&self, field: &str) -> Result<i64> {
        let parsed = match self {
            Numeric::Number(n) => n.as_i64(),
            Numeric::Text(s) => s.parse().ok(),
        };
        parsed.ok_or_else(|| Error::Feed(format!("{} is not an integer", field)))
    }
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    price: Numeric,
    size: Numeric,
    timestamp: Numeric,
    #[serde(default)]
    buyer_role: Option<String>,
}

impl RawTrade {
    fn into_event(self) -> Result<TradeEvent> {
        Ok(TradeEvent::new(
            self.price.to_decimal("price")?,
            self.size.to_decimal("size")?,
            self.timestamp.to_i64("timestamp")?,
            self.buyer_role.as_deref() == Some("taker"),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    trades: Vec<serde_json::Value>,
}

/// Decodes the exchange's JSON trade messages for one symbol
#[derive(Debug, Clone)]
pub struct FeedDecoder {
    symbol: String,
    snapshot_tail: usize,
}

impl FeedDecoder {
    pub fn new(symbol: &str, snapshot_tail: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            snapshot_tail,
        }
    }

    /// Decode one message into zero or more trades
    ///
    /// Messages of other types or other symbols decode to nothing. Snapshots yield only
    /// their last `snapshot_tail` trades, oldest first; a malformed trade in a snapshot is
    /// logged and dropped on its own.
    pub fn decode(&self, message: &str) -> Result<Vec<TradeEvent>> {
        let value: serde_json::Value = serde_json::from_str(message)
            .map_err(|e| Error::Feed(format!("invalid json: {}", e)))?;
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|e| Error::Feed(format!("missing message type: {}", e)))?;

        if envelope.symbol.as_deref() != Some(self.symbol.as_str()) {
            return Ok(Vec::new());
        }

        match envelope.kind.as_str() {
            "all_trades" => {
                let trade: RawTrade = serde_json::from_value(value)
                    .map_err(|e| Error::Feed(format!("bad trade: {}", e)))?;
                Ok(vec![trade.into_event()?])
            }
            "all_trades_snapshot" => {
                let snapshot: Snapshot = serde_json::from_value(value)
                    .map_err(|e| Error::Feed(format!("bad snapshot: {}", e)))?;
                let skip = snapshot.trades.len().saturating_sub(self.snapshot_tail);
                let trades = snapshot
                    .trades
                    .into_iter()
                    .skip(skip)
                    .filter_map(|raw| {
                        let decoded = serde_json::from_value::<RawTrade>(raw)
                            .map_err(|e| Error::Feed(format!("bad trade: {}", e)))
                            .and_then(RawTrade::into_event);
                        match decoded {
                            Ok(trade) => Some(trade),
                            Err(e) => {
                                tracing::warn!("Dropping snapshot trade: {}", e);
                                None
                            }
                        }
                    })
                    .collect();
                Ok(trades)
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Counters from one feed session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedStats {
    pub lines: usize,
    pub trades: usize,
    pub decode_failures: usize,
}

/// Read newline-delimited feed messages and broadcast the decoded trades
///
/// Decode failures are logged and skipped. Returns when the reader is exhausted or every
/// receiver is gone.
pub async fn pump_lines<R>(
    mut reader: R,
    decoder: &FeedDecoder,
    tx: &broadcast::Sender<TradeEvent>,
) -> Result<FeedStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = FeedStats::default();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        stats.lines += 1;

        let trades = match decoder.decode(message) {
            Ok(trades) => trades,
            Err(e) => {
                stats.decode_failures += 1;
                tracing::warn!("Skipping feed message: {}", e);
                continue;
            }
        };

        for trade in trades {
            if tx.send(trade).is_err() {
                tracing::info!("All feed subscribers gone, stopping");
                return Ok(stats);
            }
            stats.trades += 1;
        }
    }

    tracing::info!(
        "Feed ended: {} lines, {} trades, {} decode failures",
        stats.lines,
        stats.trades,
        stats.decode_failures
    );
    Ok(stats)
}
