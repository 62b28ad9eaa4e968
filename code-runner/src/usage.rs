//! Per-caller accounting of completed requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::{
    error::Error,
    types::{UsageEntry, UsageRecord},
};

/// Backing store for usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, caller_id: &str, entry: UsageEntry) -> Result<(), Error>;

    async fn get(&self, caller_id: &str) -> Result<UsageRecord, Error>;
}

#[derive(Default)]
pub struct InMemoryUsageStore {
    records: Mutex<HashMap<String, UsageRecord>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn append(&self, caller_id: &str, entry: UsageEntry) -> Result<(), Error> {
        self.records
            .lock()
            .await
            .entry(caller_id.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn get(&self, caller_id: &str) -> Result<UsageRecord, Error> {
        Ok(self
            .records
            .lock()
            .await
            .get(caller_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Serialize, Deserialize)]
struct UsageLine {
    caller_id: String,
    #[serde(flatten)]
    entry: UsageEntry,
}

/// Append-only JSON-lines usage log. Reads scan the file, so history order
/// is insertion order.
pub struct JsonlUsageStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlUsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }
}

#[async_trait]
impl UsageStore for JsonlUsageStore {
    async fn append(&self, caller_id: &str, entry: UsageEntry) -> Result<(), Error> {
        let mut line = serde_json::to_string(&UsageLine {
            caller_id: caller_id.to_string(),
            entry,
        })
        .map_err(|e| Error::Usage(format!("Failed to encode usage entry: {}", e)))?;
        line.push('\n');

        let _guard = self.writer.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn get(&self, caller_id: &str) -> Result<UsageRecord, Error> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(UsageRecord::default()),
            Err(e) => return Err(e.into()),
        };

        let mut record = UsageRecord::default();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageLine>(line) {
                Ok(parsed) if parsed.caller_id == caller_id => record.push(parsed.entry),
                Ok(_) => {}
                Err(e) => warn!(line = number + 1, "Skipping malformed usage line: {}", e),
            }
        }
        Ok(record)
    }
}

/// Accounting front for the dispatcher. Appends never fail from the caller's
/// point of view: store errors are logged and dropped.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryUsageStore::new()))
    }

    pub async fn append(&self, caller_id: &str, is_cached: bool, status_code: u16, timestamp: DateTime<Utc>) {
        let entry = UsageEntry {
            is_cached,
            status_code,
            timestamp,
        };
        match self.store.append(caller_id, entry).await {
            Ok(()) => debug!(caller = caller_id, is_cached, status_code, "Recorded usage"),
            Err(e) => warn!(caller = caller_id, "Failed to record usage: {}", e),
        }
    }

    pub async fn get_usage(&self, caller_id: &str) -> Result<UsageRecord, Error> {
        self.store.get(caller_id).await
    }
}
