use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A code submission as accepted from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Language identifier, resolved against the registry
    pub language: String,
    /// Source code to execute
    pub source: String,
    /// Standard input fed to the program
    #[serde(default)]
    pub stdin: Option<String>,
    /// Wall-clock limit for the run phase; service default when absent
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    /// Memory ceiling for the run phase; service default when absent
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
    /// Identity resolved by the authentication layer (API key)
    #[serde(default = "default_caller")]
    pub caller_id: String,
}

fn default_caller() -> String {
    "anonymous".to_string()
}

/// Effective limits for one run, after defaults were applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub time_limit_ms: u64,
    pub memory_limit_bytes: u64,
}

/// Raw outcome of one sandbox run. Never leaves the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionTelemetry {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time_ms: u64,
    pub compile_time_ms: u64,
    pub peak_memory_bytes: u64,
    pub average_memory_bytes: u64,
    pub peak_cpu_percent: f32,
    pub average_cpu_percent: f32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub killed_by_system: bool,
    pub compile_failed: bool,
    pub cancelled: bool,
}

/// Normalized outcome of a submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Accepted,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    InternalError,
    Failed,
    #[default]
    Idle,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "accepted",
            Status::TimeLimitExceeded => "time_limit_exceeded",
            Status::MemoryLimitExceeded => "memory_limit_exceeded",
            Status::RuntimeError => "runtime_error",
            Status::InternalError => "internal_error",
            Status::Failed => "failed",
            Status::Idle => "idle",
        }
    }

    /// Whether a result with this status describes the submission itself
    /// rather than a condition of the host, and may therefore be cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, Status::Idle | Status::InternalError | Status::Failed)
    }

    /// Transport status code a result with this status is delivered with.
    pub fn status_code(&self) -> u16 {
        match self {
            Status::InternalError => 500,
            _ => 200,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub peak_memory_bytes: u64,
    pub average_memory_bytes: u64,
    pub peak_cpu_percent: f32,
    pub average_cpu_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub compilation_time_ms: u64,
    pub total_time_ms: u64,
}

/// Externally visible result of a submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Status,
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub resource_usage: ResourceUsage,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub killed_by_system: bool,
    pub metrics: ExecutionMetrics,
}

/// One completed request as seen by the accounting layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub is_cached: bool,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
}

/// Per-caller usage counters and ordered history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub cache_count: u64,
    pub uncache_count: u64,
    pub history: Vec<UsageEntry>,
}

impl UsageRecord {
    pub fn push(&mut self, entry: UsageEntry) {
        if entry.is_cached {
            self.cache_count += 1;
        } else {
            self.uncache_count += 1;
        }
        self.history.push(entry);
    }
}
