//! Submission dispatcher: the node-local front door of the engine.

use chrono::Utc;
use serde::Serialize;
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::{
    cache::{InMemoryResultStore, ResultStore},
    cancel::CancelToken,
    classifier,
    config::ServiceConfig,
    error::Error,
    executor::{Executor, Job, SandboxExecutor},
    fingerprint::Fingerprint,
    inflight::{Claim, InFlight, LeaderGuard},
    languages::LanguageRegistry,
    metrics::{Metrics, MetricsSnapshot, Served},
    pool::{PoolStats, WorkerPool},
    types::{ExecutionResult, ResourceLimits, SubmissionRequest, UsageRecord},
    usage::{InMemoryUsageStore, JsonlUsageStore, UsageRecorder, UsageStore},
};

/// Collaborators of the dispatcher, constructed at startup
pub struct Components {
    pub registry: LanguageRegistry,
    pub executor: Arc<dyn Executor>,
    pub cache: Arc<dyn ResultStore>,
    pub usage: UsageRecorder,
    pub metrics: Arc<Metrics>,
}

impl Components {
    /// Production wiring for a configuration
    pub fn from_config(config: &ServiceConfig) -> Self {
        let usage_store: Arc<dyn UsageStore> = match &config.usage_log {
            Some(path) => Arc::new(JsonlUsageStore::new(path)),
            None => Arc::new(InMemoryUsageStore::new()),
        };

        Self {
            registry: LanguageRegistry::builtin(),
            executor: Arc::new(SandboxExecutor::new(config.sandbox_settings())),
            cache: Arc::new(InMemoryResultStore::new(config.cache_capacity)),
            usage: UsageRecorder::new(usage_store),
            metrics: Arc::new(Metrics::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub pool: PoolStats,
    pub in_flight: usize,
    pub metrics: MetricsSnapshot,
}

struct Prepared {
    job: Job,
    fingerprint: Fingerprint,
}

#[derive(Clone)]
pub struct CodeExecutionService {
    config: Arc<ServiceConfig>,
    registry: Arc<LanguageRegistry>,
    executor: Arc<dyn Executor>,
    cache: Arc<dyn ResultStore>,
    inflight: InFlight,
    pool: WorkerPool,
    usage: UsageRecorder,
    metrics: Arc<Metrics>,
}

impl CodeExecutionService {
    pub fn new(config: ServiceConfig) -> Result<Self, Error> {
        let components = Components::from_config(&config);
        Self::with_components(config, components)
    }

    pub fn with_components(config: ServiceConfig, components: Components) -> Result<Self, Error> {
        config.validate()?;
        info!(
            max_concurrent = config.max_concurrent,
            queue_capacity = config.queue_capacity,
            backend = ?config.backend,
            "Starting code execution service"
        );

        Ok(Self {
            pool: WorkerPool::new(config.max_concurrent, config.queue_capacity),
            config: Arc::new(config),
            registry: Arc::new(components.registry),
            executor: components.executor,
            cache: components.cache,
            inflight: InFlight::new(),
            usage: components.usage,
            metrics: components.metrics,
        })
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Execute a submission. Fails only with a pre-commit rejection or
    /// `LoadShed`; every other outcome, host faults included, is a Result.
    pub async fn execute(&self, request: SubmissionRequest) -> Result<ExecutionResult, Error> {
        self.execute_with_cancel(request, CancelToken::never()).await
    }

    /// Like [`execute`](Self::execute), with a caller-side cancellation
    /// signal. The submission runs on its own task: dropping the returned
    /// future cancels the run, and the outcome is still accounted.
    #[instrument(skip_all, fields(language = %request.language, caller = %request.caller_id))]
    pub async fn execute_with_cancel(
        &self,
        request: SubmissionRequest,
        mut cancel: CancelToken,
    ) -> Result<ExecutionResult, Error> {
        let started = Instant::now();
        let caller_id = request.caller_id.clone();
        let (canceller, token) = CancelToken::new();
        let guard = canceller.cancel_on_drop();

        let service = self.clone();
        let mut task = tokio::spawn(
            async move { service.dispatch(request, token, started).await }.in_current_span(),
        );

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = cancel.cancelled() => {
                guard.cancel();
                task.await
            }
        };

        match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Submission task failed: {}", e);
                let result = classifier::internal_error("submission task failed");
                Ok(self.finish(&caller_id, result, Served::Executed, started).await)
            }
        }
    }

    async fn dispatch(
        &self,
        request: SubmissionRequest,
        mut cancel: CancelToken,
        started: Instant,
    ) -> Result<ExecutionResult, Error> {
        let caller_id = request.caller_id.as_str();
        let prepared = match self.prepare(&request) {
            Ok(prepared) => prepared,
            Err(e) if e.is_rejection() => {
                debug!("Rejected submission: {}", e);
                self.metrics.rejected();
                return Err(e);
            }
            Err(e) => {
                error!("Failed to prepare submission: {}", e);
                let result = classifier::internal_error(e.to_string());
                return Ok(self.finish(caller_id, result, Served::Executed, started).await);
            }
        };

        match self.cache.get(&prepared.fingerprint).await {
            Ok(Some(result)) => {
                debug!(fingerprint = prepared.fingerprint.short(), "Cache hit");
                return Ok(self.finish(caller_id, result, Served::CacheHit, started).await);
            }
            Ok(None) => {}
            Err(e) => {
                error!("Result cache unavailable: {}", e);
                let result = classifier::internal_error(e.to_string());
                return Ok(self.finish(caller_id, result, Served::Executed, started).await);
            }
        }

        let outcome = loop {
            let follower = match self.inflight.acquire_or_join(&prepared.fingerprint) {
                Claim::Leader(guard) => break self.lead(guard, &prepared, cancel.clone()).await,
                Claim::Follower(follower) => follower,
            };
            debug!(fingerprint = prepared.fingerprint.short(), "Following in-flight execution");
            tokio::select! {
                outcome = follower.wait() => match outcome {
                    Ok(Some(result)) => break Ok((result, Served::Follower)),
                    Ok(None) => {
                        debug!(fingerprint = prepared.fingerprint.short(), "Leader gave up, claiming again");
                        tokio::task::yield_now().await;
                    }
                    Err(e) => break Err(e),
                },
                _ = cancel.cancelled() => break Ok((cancelled(), Served::Follower)),
            }
        };

        match outcome {
            Ok((result, served)) => Ok(self.finish(caller_id, result, served, started).await),
            Err(Error::LoadShed) => {
                self.metrics.load_shed();
                Err(Error::LoadShed)
            }
            Err(e) => {
                error!("Execution failed: {}", e);
                let result = classifier::internal_error(e.to_string());
                Ok(self.finish(caller_id, result, Served::Executed, started).await)
            }
        }
    }

    /// Leader path: run the job in a pool slot, then release the slot, write
    /// the cache and publish to followers, in that order. A leader cancelled
    /// before reaching a verdict hands the claim back instead of publishing.
    async fn lead(
        &self,
        guard: LeaderGuard,
        prepared: &Prepared,
        mut cancel: CancelToken,
    ) -> Result<(ExecutionResult, Served), Error> {
        let Prepared { job, fingerprint } = prepared;

        // A previous leader may have published between our cache miss and our claim
        if let Ok(Some(result)) = self.cache.get(fingerprint).await {
            guard.complete(result.clone());
            return Ok((result, Served::CacheHit));
        }

        let slot = tokio::select! {
            slot = self.pool.acquire() => slot,
            _ = cancel.cancelled() => {
                guard.abandon();
                return Ok((cancelled(), Served::Executed));
            }
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(Error::LoadShed) => {
                guard.shed();
                return Err(Error::LoadShed);
            }
            Err(e) => return Err(e),
        };

        debug!(fingerprint = fingerprint.short(), "Executing submission");
        let result = match self.executor.run(job, cancel.clone()).await {
            Ok(telemetry) => classifier::assemble(telemetry, &job.limits),
            Err(Error::ToolchainUnavailable(program)) => {
                warn!(program = %program, "Toolchain unavailable on this node");
                classifier::failed(format!("toolchain unavailable on this node: {}", program))
            }
            Err(e) => {
                error!("Sandbox failure: {}", e);
                classifier::internal_error(e.to_string())
            }
        };
        drop(slot);

        // The cancellation belongs to this caller only
        if cancel.is_cancelled() && !result.status.is_cacheable() {
            guard.abandon();
            return Ok((result, Served::Executed));
        }

        if result.status.is_cacheable() {
            if let Err(e) = self.cache.put(fingerprint, &result).await {
                warn!(fingerprint = fingerprint.short(), "Failed to cache result: {}", e);
            }
        }
        guard.complete(result.clone());
        Ok((result, Served::Executed))
    }

    async fn finish(
        &self,
        caller_id: &str,
        result: ExecutionResult,
        served: Served,
        started: Instant,
    ) -> ExecutionResult {
        let is_cached = served != Served::Executed;
        self.usage
            .append(caller_id, is_cached, result.status.status_code(), Utc::now())
            .await;
        self.metrics.observe(result.status, served, started.elapsed());

        info!(
            status = %result.status,
            cached = is_cached,
            execution_time_ms = result.execution_time_ms,
            total_ms = started.elapsed().as_millis() as u64,
            "Submission completed"
        );
        result
    }

    fn prepare(&self, request: &SubmissionRequest) -> Result<Prepared, Error> {
        let spec = self.registry.resolve(&request.language)?;

        if request.source.trim().is_empty() {
            return Err(Error::InvalidRequest("source code is empty".to_string()));
        }
        if request.source.len() > self.config.max_source_bytes {
            return Err(Error::InvalidRequest(format!(
                "source code exceeds {} bytes",
                self.config.max_source_bytes
            )));
        }
        if let Some(stdin) = &request.stdin {
            if stdin.len() > self.config.max_stdin_bytes {
                return Err(Error::InvalidRequest(format!(
                    "stdin exceeds {} bytes",
                    self.config.max_stdin_bytes
                )));
            }
        }

        let limits = self.resolve_limits(request)?;
        let fingerprint = Fingerprint::compute(
            spec.id,
            &request.source,
            request.stdin.as_deref(),
            &limits,
        );

        Ok(Prepared {
            job: Job {
                commands: spec.render()?,
                source: request.source.clone(),
                stdin: request.stdin.clone(),
                limits,
            },
            fingerprint,
        })
    }

    fn resolve_limits(&self, request: &SubmissionRequest) -> Result<ResourceLimits, Error> {
        let config = &self.config;
        let time_limit_ms = request.time_limit_ms.unwrap_or(config.default_time_limit_ms);
        if !(config.min_time_limit_ms..=config.max_time_limit_ms).contains(&time_limit_ms) {
            return Err(Error::InvalidRequest(format!(
                "timeLimitMs must be within [{}, {}]",
                config.min_time_limit_ms, config.max_time_limit_ms
            )));
        }

        let memory_limit_bytes = request
            .memory_limit_bytes
            .unwrap_or(config.default_memory_limit_bytes);
        if !(config.min_memory_limit_bytes..=config.max_memory_limit_bytes).contains(&memory_limit_bytes) {
            return Err(Error::InvalidRequest(format!(
                "memoryLimitBytes must be within [{}, {}]",
                config.min_memory_limit_bytes, config.max_memory_limit_bytes
            )));
        }

        Ok(ResourceLimits {
            time_limit_ms,
            memory_limit_bytes,
        })
    }

    pub async fn get_usage(&self, caller_id: &str) -> Result<UsageRecord, Error> {
        self.usage.get_usage(caller_id).await
    }

    pub fn get_available_slots(&self) -> usize {
        self.pool.available_slots()
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            pool: self.pool.stats(),
            in_flight: self.inflight.len(),
            metrics: self.metrics.snapshot(),
        }
    }
}

fn cancelled() -> ExecutionResult {
    ExecutionResult {
        killed_by_system: true,
        ..classifier::internal_error("execution cancelled")
    }
}
