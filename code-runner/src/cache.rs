use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::Error, fingerprint::Fingerprint, types::ExecutionResult};

/// Store of completed verdicts keyed by fingerprint.
///
/// Entries are immutable once written: a second `put` for the same key keeps
/// the first verdict.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ExecutionResult>, Error>;

    async fn put(&self, fingerprint: &Fingerprint, result: &ExecutionResult) -> Result<(), Error>;
}

struct Entries {
    results: HashMap<Fingerprint, ExecutionResult>,
    order: VecDeque<Fingerprint>,
}

/// Process-local result store, bounded by entry count with oldest-first eviction
pub struct InMemoryResultStore {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl InMemoryResultStore {
    /// `capacity == 0` means unbounded
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                results: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<ExecutionResult>, Error> {
        Ok(self.entries.lock().await.results.get(fingerprint).cloned())
    }

    async fn put(&self, fingerprint: &Fingerprint, result: &ExecutionResult) -> Result<(), Error> {
        if !result.status.is_cacheable() {
            return Err(Error::Cache(format!(
                "refusing to cache a {} result",
                result.status
            )));
        }

        let mut entries = self.entries.lock().await;
        if entries.results.contains_key(fingerprint) {
            return Ok(());
        }

        if self.capacity > 0 {
            while entries.results.len() >= self.capacity {
                match entries.order.pop_front() {
                    Some(oldest) => {
                        debug!(fingerprint = oldest.short(), "Evicting cached result");
                        entries.results.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        entries.order.push_back(fingerprint.clone());
        entries.results.insert(fingerprint.clone(), result.clone());
        Ok(())
    }
}
