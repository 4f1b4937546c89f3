pub mod json;
pub mod postgres;
pub mod recorder;

use std::future::Future;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Error;
use crate::models::TradeRecord;
use crate::Result;

pub use json::JsonTradeStore;
pub use postgres::PostgresTradeStore;
pub use recorder::{TradeRecorder, TradeStats};

/// Append-only trade log keyed by increasing trade id
pub trait TradeStore: Send + Sync {
    /// Store a record, replacing any record with the same id
    fn append(&self, record: &TradeRecord) -> impl Future<Output = Result<()>> + Send;

    /// All records, ordered by trade id
    fn list(&self) -> impl Future<Output = Result<Vec<TradeRecord>>> + Send;

    /// 1 + the largest stored id, or 1 for an empty log
    fn next_id(&self) -> impl Future<Output = Result<u64>> + Send {
        async move {
            let records = self.list().await?;
            Ok(records.iter().map(|r| r.trade_id).max().map_or(1, |max| max + 1))
        }
    }
}

/// The configured storage backend
pub enum Store {
    Json(JsonTradeStore),
    Postgres(PostgresTradeStore),
}

impl Store {
    /// Open the backend named in the config (`DATABASE_URL` for Postgres)
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Json => Ok(Store::Json(JsonTradeStore::new(&config.json_path))),
            StorageBackend::Postgres => {
                let url = std::env::var("DATABASE_URL")
                    .map_err(|_| Error::Config("DATABASE_URL is not set".to_string()))?;
                Ok(Store::Postgres(PostgresTradeStore::new(&url).await?))
            }
        }
    }
}

impl TradeStore for Store {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        match self {
            Store::Json(store) => store.append(record).await,
            Store::Postgres(store) => store.append(record).await,
        }
    }

    async fn list(&self) -> Result<Vec<TradeRecord>> {
        match self {
            Store::Json(store) => store.list().await,
            Store::Postgres(store) => store.list().await,
        }
    }

    async fn next_id(&self) -> Result<u64> {
        match self {
            Store::Json(store) => store.next_id().await,
            Store::Postgres(store) => store.next_id().await,
        }
    }
}
