use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use crate::types::Status;

/// Upper bounds (inclusive, milliseconds) of the latency histogram buckets
pub const LATENCY_BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1_000, 5_000, 30_000];

/// How a request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    CacheHit,
    Follower,
    Executed,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub completed: u64,
    pub cache_hits: u64,
    pub follower_hits: u64,
    pub executions: u64,
    pub load_shed: u64,
    pub rejected: u64,
    pub statuses: BTreeMap<String, u64>,
    /// Cumulative counts per bucket bound; the final entry is `+Inf`
    pub latency_buckets: Vec<(String, u64)>,
    pub latency_sum_ms: u64,
}

#[derive(Default)]
struct Counters {
    completed: u64,
    cache_hits: u64,
    follower_hits: u64,
    executions: u64,
    load_shed: u64,
    rejected: u64,
    statuses: BTreeMap<Status, u64>,
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
    latency_sum_ms: u64,
}

/// Process-wide execution metrics, injected into the dispatcher
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn observe(&self, status: Status, served: Served, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        let bucket = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| latency_ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());

        let mut counters = self.lock();
        counters.completed += 1;
        match served {
            Served::CacheHit => counters.cache_hits += 1,
            Served::Follower => counters.follower_hits += 1,
            Served::Executed => counters.executions += 1,
        }
        *counters.statuses.entry(status).or_default() += 1;
        counters.buckets[bucket] += 1;
        counters.latency_sum_ms += latency_ms;
    }

    pub fn load_shed(&self) {
        self.lock().load_shed += 1;
    }

    pub fn rejected(&self) {
        self.lock().rejected += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.lock();
        let mut cumulative = 0;
        let latency_buckets = counters
            .buckets
            .iter()
            .enumerate()
            .map(|(i, count)| {
                cumulative += count;
                let bound = LATENCY_BUCKETS_MS
                    .get(i)
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "+Inf".to_string());
                (bound, cumulative)
            })
            .collect();

        MetricsSnapshot {
            completed: counters.completed,
            cache_hits: counters.cache_hits,
            follower_hits: counters.follower_hits,
            executions: counters.executions,
            load_shed: counters.load_shed,
            rejected: counters.rejected,
            statuses: counters
                .statuses
                .iter()
                .map(|(status, count)| (status.to_string(), *count))
                .collect(),
            latency_buckets,
            latency_sum_ms: counters.latency_sum_ms,
        }
    }
}
