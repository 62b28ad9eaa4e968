//! # Code Runner
//!
//! A node-local code execution engine. Submissions in any registered language
//! are compiled (when needed) and run in a fresh, resource-bounded sandbox;
//! the outcome is classified into a normalized status, cached by content
//! fingerprint and accounted per caller.
//!
//! Identical submissions arriving concurrently are executed once: the first
//! becomes the leader, the rest wait for its verdict.

pub mod cache;
pub mod cancel;
pub mod classifier;
pub mod config;
mod error;
pub mod executor;
pub mod fingerprint;
pub mod inflight;
pub mod languages;
pub mod metrics;
pub mod pool;
pub mod sandbox;
mod service;
mod types;
pub mod usage;

#[cfg(test)]
mod tests;

pub use cache::{InMemoryResultStore, ResultStore};
pub use cancel::{CancelOnDrop, CancelToken, Canceller};
pub use config::ServiceConfig;
pub use error::Error;
pub use executor::{Executor, Job, SandboxExecutor, SandboxSettings};
pub use fingerprint::Fingerprint;
pub use languages::{LanguageRegistry, LanguageSpec};
pub use metrics::{Metrics, MetricsSnapshot};
pub use sandbox::IsolationBackend;
pub use service::{CodeExecutionService, Components, ServiceStats};
pub use types::{
    ExecutionMetrics, ExecutionResult, ExecutionTelemetry, ResourceLimits, ResourceUsage, Status,
    SubmissionRequest, UsageEntry, UsageRecord,
};
pub use usage::{InMemoryUsageStore, JsonlUsageStore, UsageRecorder, UsageStore};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
