use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::models::TradeRecord;
use crate::persistence::TradeStore;
use crate::Result;

/// Trade log kept as a pretty-printed JSON array in one file
///
/// Writes are serialized through a mutex so concurrent appends never interleave.
pub struct JsonTradeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonTradeStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<TradeRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Persistence(format!("{}: {}", self.path.display(), e))),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))
    }
}

impl TradeStore for JsonTradeStore {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        let _guard = self.lock.lock().await;

        let mut records = self.read().await?;
        match records.iter_mut().find(|r| r.trade_id == record.trade_id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        records.sort_by_key(|r| r.trade_id);

        let json = serde_json::to_string_pretty(&records)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", self.path.display(), e)))?;

        tracing::debug!("Saved trade #{} to {}", record.trade_id, self.path.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TradeRecord>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }
}
