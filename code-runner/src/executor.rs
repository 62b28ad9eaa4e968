use async_trait::async_trait;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, instrument};

use crate::{
    cancel::CancelToken,
    error::Error,
    languages::RenderedCommands,
    sandbox::{run_process, IsolationBackend, ProcessOutcome, ProcessSpec, Workspace},
    types::{ExecutionTelemetry, ResourceLimits},
};

/// One unit of work for the sandbox: rendered commands, source, input, limits
#[derive(Debug, Clone)]
pub struct Job {
    pub commands: RenderedCommands,
    pub source: String,
    pub stdin: Option<String>,
    pub limits: ResourceLimits,
}

/// Runs a job in an isolated environment and reports raw telemetry.
///
/// Non-zero exits, timeouts, limit breaches and cancellation are telemetry,
/// not errors. Only host faults are returned as `Err`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, job: &Job, cancel: CancelToken) -> Result<ExecutionTelemetry, Error>;
}

/// Host-side settings shared by every run
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub workspace_root: PathBuf,
    pub backend: IsolationBackend,
    pub output_limit_bytes: usize,
    pub file_size_limit_bytes: u64,
    pub sample_interval: Duration,
    pub compile_timeout: Duration,
    pub compile_memory_limit_bytes: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            backend: IsolationBackend::default(),
            output_limit_bytes: 64 * 1024,
            file_size_limit_bytes: 10 * 1024 * 1024, // 10MB
            sample_interval: Duration::from_millis(20),
            compile_timeout: Duration::from_secs(30),
            compile_memory_limit_bytes: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Process-based sandbox executor; one fresh workspace per job
pub struct SandboxExecutor {
    settings: SandboxSettings,
}

impl SandboxExecutor {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    fn process_spec<'a>(
        &self,
        workspace: &'a Workspace,
        command: &'a crate::languages::RenderedCommand,
        stdin: Option<&'a str>,
        time_limit: Duration,
        memory_limit_bytes: u64,
    ) -> ProcessSpec<'a> {
        ProcessSpec {
            command,
            workdir: &workspace.root_dir,
            home: workspace.home(),
            tmp: workspace.tmp(),
            stdin,
            time_limit,
            memory_limit_bytes,
            output_limit_bytes: self.settings.output_limit_bytes,
            file_size_limit_bytes: self.settings.file_size_limit_bytes,
            sample_interval: self.settings.sample_interval,
            backend: self.settings.backend,
        }
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    #[instrument(skip_all, fields(language = job.commands.language))]
    async fn run(&self, job: &Job, cancel: CancelToken) -> Result<ExecutionTelemetry, Error> {
        // Dropped on every exit path, taking the directory with it
        let workspace = Workspace::create(&self.settings.workspace_root).await?;
        workspace
            .write_source(&job.commands.source_file, &job.source)
            .await?;

        let mut compile_time_ms = 0;
        if let Some(compile) = &job.commands.compile {
            let spec = self.process_spec(
                &workspace,
                compile,
                None,
                self.settings.compile_timeout,
                self.settings.compile_memory_limit_bytes,
            );
            let outcome = run_process(spec, cancel.clone()).await?;
            compile_time_ms = outcome.wall_time.as_millis() as u64;

            if !outcome.succeeded() {
                info!(compile_time_ms, "Compilation failed, skipping run phase");
                return Ok(compile_failure(outcome));
            }
            debug!(compile_time_ms, "Compilation finished");
        }

        let spec = self.process_spec(
            &workspace,
            &job.commands.run,
            job.stdin.as_deref(),
            Duration::from_millis(job.limits.time_limit_ms),
            job.limits.memory_limit_bytes,
        );
        let outcome = run_process(spec, cancel).await?;
        Ok(run_telemetry(outcome, compile_time_ms))
    }
}

fn run_telemetry(outcome: ProcessOutcome, compile_time_ms: u64) -> ExecutionTelemetry {
    ExecutionTelemetry {
        exit_code: outcome.exit_code,
        signal: outcome.signal,
        wall_time_ms: outcome.wall_time.as_millis() as u64,
        compile_time_ms,
        peak_memory_bytes: outcome.usage.peak_memory_bytes,
        average_memory_bytes: outcome.usage.average_memory_bytes,
        peak_cpu_percent: outcome.usage.peak_cpu_percent,
        average_cpu_percent: outcome.usage.average_cpu_percent,
        stdout: outcome.stdout.text,
        stderr: outcome.stderr.text,
        stdout_truncated: outcome.stdout.truncated,
        stderr_truncated: outcome.stderr.truncated,
        timed_out: outcome.timed_out,
        memory_exceeded: outcome.memory_exceeded,
        killed_by_system: outcome.killed_by_system,
        compile_failed: false,
        cancelled: outcome.cancelled,
    }
}

/// Compiler diagnostics go to stderr regardless of which stream the
/// compiler wrote them to; the run phase never happened.
fn compile_failure(outcome: ProcessOutcome) -> ExecutionTelemetry {
    let compile_time_ms = outcome.wall_time.as_millis() as u64;
    let diagnostics = [outcome.stderr.text.as_str(), outcome.stdout.text.as_str()]
        .iter()
        .filter(|s| !s.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");
    let truncated = outcome.stderr.truncated || outcome.stdout.truncated;

    let mut telemetry = run_telemetry(outcome, compile_time_ms);
    telemetry.wall_time_ms = 0;
    telemetry.stdout = String::new();
    telemetry.stdout_truncated = false;
    telemetry.stderr = diagnostics;
    telemetry.stderr_truncated = truncated;
    telemetry.compile_failed = true;
    telemetry
}
