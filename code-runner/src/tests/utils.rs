pub mod defaults {
    use crate::{ServiceConfig, SandboxSettings};
    use std::{path::Path, time::Duration};

    pub fn test_config(workspace_root: &Path) -> ServiceConfig {
        ServiceConfig {
            max_concurrent: 2,
            queue_capacity: 4,
            default_time_limit_ms: 2_000,
            sample_interval_ms: 10,
            compile_timeout_ms: 60_000,
            workspace_root: workspace_root.to_path_buf(),
            ..ServiceConfig::default()
        }
    }

    pub fn test_settings(workspace_root: &Path) -> SandboxSettings {
        SandboxSettings {
            workspace_root: workspace_root.to_path_buf(),
            sample_interval: Duration::from_millis(10),
            ..SandboxSettings::default()
        }
    }
}

pub mod fakes {
    use async_trait::async_trait;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::{
        cancel::CancelToken, executor::Executor, fingerprint::Fingerprint, Error,
        ExecutionResult, ExecutionTelemetry, Job, ResultStore,
    };

    pub fn accepted_telemetry(stdout: &str) -> ExecutionTelemetry {
        ExecutionTelemetry {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            wall_time_ms: 12,
            peak_memory_bytes: 1 << 20,
            ..Default::default()
        }
    }

    /// Executor that counts runs, takes a fixed time and honours cancellation
    pub struct CountingExecutor {
        runs: AtomicUsize,
        delay: Duration,
    }

    impl CountingExecutor {
        pub fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                delay,
            })
        }

        pub fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn run(&self, job: &Job, mut cancel: CancelToken) -> Result<ExecutionTelemetry, Error> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {
                    Ok(accepted_telemetry(&format!("ran {}\n", job.source)))
                }
                _ = cancel.cancelled() => Ok(ExecutionTelemetry {
                    signal: Some(9),
                    killed_by_system: true,
                    cancelled: true,
                    ..Default::default()
                }),
            }
        }
    }

    /// Result store whose reads always fail
    pub struct UnavailableStore;

    #[async_trait]
    impl ResultStore for UnavailableStore {
        async fn get(&self, _fingerprint: &Fingerprint) -> Result<Option<ExecutionResult>, Error> {
            Err(Error::Cache("store unreachable".to_string()))
        }

        async fn put(&self, _fingerprint: &Fingerprint, _result: &ExecutionResult) -> Result<(), Error> {
            Err(Error::Cache("store unreachable".to_string()))
        }
    }
}

pub mod services {
    use std::{path::Path, sync::Arc};

    use crate::{
        executor::Executor, CodeExecutionService, Components, InMemoryResultStore,
        LanguageRegistry, Metrics, ResultStore, ServiceConfig, UsageRecorder,
    };

    pub fn service_with(executor: Arc<dyn Executor>, config: ServiceConfig) -> CodeExecutionService {
        service_with_store(executor, Arc::new(InMemoryResultStore::default()), config)
    }

    pub fn service_with_store(
        executor: Arc<dyn Executor>,
        cache: Arc<dyn ResultStore>,
        config: ServiceConfig,
    ) -> CodeExecutionService {
        let components = Components {
            registry: LanguageRegistry::builtin(),
            executor,
            cache,
            usage: UsageRecorder::in_memory(),
            metrics: Arc::new(Metrics::new()),
        };
        CodeExecutionService::with_components(config, components).expect("valid test config")
    }

    pub fn real_service(workspace_root: &Path) -> CodeExecutionService {
        CodeExecutionService::new(super::defaults::test_config(workspace_root)).expect("valid test config")
    }
}
