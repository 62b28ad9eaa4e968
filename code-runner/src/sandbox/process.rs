use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::{
    io::AsyncWriteExt,
    process::Command,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

use super::{capture, Captured, IsolationBackend, KernelLimits, UsageSampler, UsageSummary};
use crate::{cancel::CancelToken, error::Error, languages::RenderedCommand};

/// How long to wait for pipes to drain once the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Everything needed to run one command inside a workspace
#[derive(Debug, Clone)]
pub struct ProcessSpec<'a> {
    pub command: &'a RenderedCommand,
    pub workdir: &'a Path,
    pub home: PathBuf,
    pub tmp: PathBuf,
    pub stdin: Option<&'a str>,
    pub time_limit: Duration,
    pub memory_limit_bytes: u64,
    pub output_limit_bytes: usize,
    pub file_size_limit_bytes: u64,
    pub sample_interval: Duration,
    pub backend: IsolationBackend,
}

/// Raw outcome of one process run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub wall_time: Duration,
    pub usage: UsageSummary,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    pub cancelled: bool,
    pub killed_by_system: bool,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none() && !self.killed_by_system
    }
}

enum KillReason {
    Timeout,
    Memory,
    Cancelled,
}

/// Owns a process group; the whole group is killed when this is dropped
pub struct ProcessGroup {
    pgid: Pid,
}

impl ProcessGroup {
    pub fn new(leader: u32) -> Self {
        Self {
            pgid: Pid::from_raw(leader as i32),
        }
    }

    pub fn kill(&self) {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = %self.pgid, "Failed to kill process group: {}", e),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

fn resolve_program(command: &RenderedCommand, workdir: &Path) -> Result<PathBuf, Error> {
    if let Some(name) = command.workspace_program() {
        return Ok(workdir.join(name));
    }
    which::which(&command.program).map_err(|_| Error::ToolchainUnavailable(command.program.clone()))
}

fn sandbox_path() -> String {
    std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string())
}

/// Run one command to completion under a wall-clock timeout and a sampled
/// memory ceiling. Expected failures (non-zero exit, signals, limit breaches,
/// cancellation) are reported in the outcome; only host faults are errors.
pub async fn run_process(spec: ProcessSpec<'_>, mut cancel: CancelToken) -> Result<ProcessOutcome, Error> {
    let program = resolve_program(spec.command, spec.workdir)?;
    debug!(program = ?program, args = ?spec.command.args, "Spawning sandboxed process");

    let mut command = Command::new(&program);
    command
        .args(&spec.command.args)
        .env_clear()
        .env("PATH", sandbox_path())
        .env("HOME", &spec.home)
        .env("TMPDIR", &spec.tmp)
        .env("LANG", "C.UTF-8")
        .current_dir(spec.workdir)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    spec.backend.configure(
        &mut command,
        KernelLimits {
            // Generous CPU ceiling: the wall-clock timer is the authoritative limit
            cpu_seconds: spec.time_limit.as_secs() + 1,
            file_size_bytes: spec.file_size_limit_bytes,
        },
    );

    let started = Instant::now();
    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ToolchainUnavailable(spec.command.program.clone()),
        _ => Error::Sandbox(format!("Failed to spawn process: {}", e)),
    })?;
    let pid = child
        .id()
        .ok_or_else(|| Error::Sandbox("process exited before it could be monitored".to_string()))?;
    let group = ProcessGroup::new(pid);

    if let (Some(input), Some(mut stdin)) = (spec.stdin, child.stdin.take()) {
        let input = input.to_owned();
        tokio::spawn(async move {
            // The program may exit without reading its input
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("Stdin not fully consumed: {}", e);
            }
        });
    }

    let limit = spec.output_limit_bytes;
    let stdout_task = child.stdout.take().map(|out| tokio::spawn(capture(out, limit)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(capture(err, limit)));

    let mut sampler = UsageSampler::new(pid);
    let mut ticker = time::interval(spec.sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = time::sleep(spec.time_limit);
    tokio::pin!(deadline);

    let mut outcome = ProcessOutcome::default();
    let status = loop {
        let reason = tokio::select! {
            status = child.wait() => {
                break status.map_err(|e| Error::Sandbox(format!("Failed to wait for process: {}", e)))?;
            }
            _ = &mut deadline => KillReason::Timeout,
            _ = cancel.cancelled() => KillReason::Cancelled,
            _ = ticker.tick() => match sampler.sample() {
                Some(rss) if rss > spec.memory_limit_bytes => KillReason::Memory,
                _ => continue,
            },
        };

        match reason {
            KillReason::Timeout => outcome.timed_out = true,
            KillReason::Memory => outcome.memory_exceeded = true,
            KillReason::Cancelled => outcome.cancelled = true,
        }
        outcome.killed_by_system = true;
        group.kill();
        break child
            .wait()
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to reap process: {}", e)))?;
    };
    outcome.wall_time = started.elapsed();

    // Take down any descendants still holding the pipes open
    group.kill();

    outcome.exit_code = status.code();
    outcome.signal = status.signal();
    outcome.usage = sampler.summary();
    outcome.stdout = drain(stdout_task).await;
    outcome.stderr = drain(stderr_task).await;

    debug!(
        pid,
        exit_code = ?outcome.exit_code,
        signal = ?outcome.signal,
        wall_time_ms = outcome.wall_time.as_millis() as u64,
        timed_out = outcome.timed_out,
        memory_exceeded = outcome.memory_exceeded,
        "Sandboxed process finished"
    );
    Ok(outcome)
}

async fn drain(task: Option<JoinHandle<Captured>>) -> Captured {
    let Some(mut task) = task else {
        return Captured::default();
    };
    match time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!("Output capture task failed: {}", e);
            Captured::default()
        }
        Err(_) => {
            warn!("Output pipe still open after process exit, dropping capture");
            task.abort();
            Captured::default()
        }
    }
}
