use std::time::{Duration, Instant};
use tempfile::TempDir;

use super::{fixtures::scripts, utils::defaults::test_settings};
use crate::{
    classifier,
    languages::{skip_if_not_available, Arg, CommandTemplate},
    CancelToken, Error, ExecutionTelemetry, Executor, IsolationBackend, Job, LanguageSpec,
    ResourceLimits, SandboxExecutor, SandboxSettings, Status,
};

const SHELL: LanguageSpec = LanguageSpec {
    id: "shell",
    aliases: &["sh"],
    source_file: "main.sh",
    executable: "main",
    compile: None,
    run: CommandTemplate::new(Arg::Lit("sh"), &[Arg::Source]),
    image: "alpine:3",
};

const MB: u64 = 1024 * 1024;

fn limits(time_limit_ms: u64) -> ResourceLimits {
    ResourceLimits {
        time_limit_ms,
        memory_limit_bytes: 256 * MB,
    }
}

fn job(spec: &LanguageSpec, source: &str, stdin: Option<&str>, limits: ResourceLimits) -> Job {
    Job {
        commands: spec.render().expect("test language renders"),
        source: source.to_string(),
        stdin: stdin.map(str::to_string),
        limits,
    }
}

async fn run_with(settings: SandboxSettings, job: &Job) -> Result<ExecutionTelemetry, Error> {
    SandboxExecutor::new(settings).run(job, CancelToken::never()).await
}

async fn run_shell(script: &str) -> ExecutionTelemetry {
    let root = TempDir::new().unwrap();
    run_with(test_settings(root.path()), &job(&SHELL, script, None, limits(5_000)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_echo() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let telemetry = run_shell(scripts::ECHO).await;

    assert_eq!(telemetry.exit_code, Some(0));
    assert_eq!(telemetry.stdout, "hello from the sandbox\n");
    assert!(!telemetry.killed_by_system);
    assert_eq!(classifier::classify(&telemetry, &limits(5_000)), Status::Accepted);
}

#[tokio::test]
async fn test_stdin_is_piped() {
    if skip_if_not_available(&["sh", "cat"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let job = job(&SHELL, scripts::CAT_STDIN, Some("line one\nline two\n"), limits(5_000));
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert_eq!(telemetry.stdout, "line one\nline two\n");
}

#[tokio::test]
async fn test_timeout_kills_busy_loop() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let job = job(&SHELL, scripts::BUSY_LOOP, None, limits(1_000));
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert!(telemetry.timed_out);
    assert!(telemetry.killed_by_system);
    assert_eq!(telemetry.signal, Some(9));
    assert!(telemetry.wall_time_ms >= 1_000, "wall time {}", telemetry.wall_time_ms);
    assert!(telemetry.wall_time_ms < 2_500, "wall time {}", telemetry.wall_time_ms);

    let result = classifier::assemble(telemetry, &job.limits);
    assert_eq!(result.status, Status::TimeLimitExceeded);
}

#[tokio::test]
async fn test_nonzero_exit_code() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let telemetry = run_shell(scripts::EXIT_3).await;

    assert_eq!(telemetry.exit_code, Some(3));
    assert_eq!(telemetry.stderr, "failing\n");
    assert!(!telemetry.killed_by_system);

    let result = classifier::assemble(telemetry, &limits(5_000));
    assert_eq!(result.status, Status::RuntimeError);
    assert_eq!(result.exit_code, Some(3));
}

#[tokio::test]
async fn test_signal_is_reported() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let telemetry = run_shell(scripts::SELF_KILL).await;

    assert_eq!(telemetry.signal, Some(11));
    let result = classifier::assemble(telemetry, &limits(5_000));
    assert_eq!(result.status, Status::RuntimeError);
    assert_eq!(result.signal.as_deref(), Some("SIGSEGV"));
}

#[tokio::test]
async fn test_output_is_truncated() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let settings = SandboxSettings {
        output_limit_bytes: 1024,
        ..test_settings(root.path())
    };
    let telemetry = run_with(settings, &job(&SHELL, scripts::FLOOD, None, limits(10_000)))
        .await
        .unwrap();

    assert_eq!(telemetry.exit_code, Some(0));
    assert!(telemetry.stdout_truncated);
    assert_eq!(telemetry.stdout.len(), 1024);
}

#[tokio::test]
async fn test_background_processes_do_not_outlive_run() {
    if skip_if_not_available(&["sh", "sleep"]) {
        return;
    }
    let started = Instant::now();
    let telemetry = run_shell(scripts::ORPHAN).await;

    assert_eq!(telemetry.exit_code, Some(0));
    assert_eq!(telemetry.stdout, "started\n");
    assert!(!telemetry.timed_out);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_memory_limit_breach() {
    if skip_if_not_available(&["python3"]) {
        return;
    }
    const PYTHON: LanguageSpec = LanguageSpec {
        id: "python",
        aliases: &[],
        source_file: "main.py",
        executable: "main",
        compile: None,
        run: CommandTemplate::new(Arg::Lit("python3"), &[Arg::Source]),
        image: "",
    };
    let root = TempDir::new().unwrap();
    let limits = ResourceLimits {
        time_limit_ms: 10_000,
        memory_limit_bytes: 64 * MB,
    };
    let job = job(&PYTHON, super::fixtures::code_samples::PYTHON_MEMORY_HOG, None, limits);
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert!(telemetry.memory_exceeded);
    assert!(telemetry.killed_by_system);
    assert!(!telemetry.timed_out);
    assert!(telemetry.peak_memory_bytes > 64 * MB);
    assert_eq!(classifier::classify(&telemetry, &limits), Status::MemoryLimitExceeded);
}

#[tokio::test]
async fn test_memory_limit_covers_child_processes() {
    if skip_if_not_available(&["sh", "python3"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let limits = ResourceLimits {
        time_limit_ms: 10_000,
        memory_limit_bytes: 64 * MB,
    };
    let job = job(&SHELL, scripts::CHILD_MEMORY_HOG, None, limits);
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert!(telemetry.memory_exceeded);
    assert!(telemetry.killed_by_system);
    assert!(!telemetry.timed_out);
    assert!(telemetry.peak_memory_bytes > 64 * MB);
    assert!(!telemetry.stdout.contains("escaped"));
    assert_eq!(
        classifier::assemble(telemetry, &limits).status,
        Status::MemoryLimitExceeded
    );
}

#[tokio::test]
async fn test_compile_failure_skips_run() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    const BROKEN: LanguageSpec = LanguageSpec {
        compile: Some(CommandTemplate::new(
            Arg::Lit("sh"),
            &[Arg::Lit("-c"), Arg::Lit("echo 'main.sh:1: syntax error' >&2; exit 1")],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        ..SHELL
    };
    let root = TempDir::new().unwrap();
    let job = job(&BROKEN, scripts::ECHO, None, limits(5_000));
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert!(telemetry.compile_failed);
    assert_eq!(telemetry.exit_code, Some(1));
    assert_eq!(telemetry.wall_time_ms, 0);
    assert!(telemetry.stdout.is_empty());
    assert!(telemetry.stderr.contains("syntax error"));

    let result = classifier::assemble(telemetry, &job.limits);
    assert_eq!(result.status, Status::RuntimeError);
    assert_eq!(result.execution_time_ms, 0);
}

#[tokio::test]
async fn test_compiled_artifact_runs() {
    if skip_if_not_available(&["sh", "install"]) {
        return;
    }
    const INSTALLED: LanguageSpec = LanguageSpec {
        compile: Some(CommandTemplate::new(
            Arg::Lit("install"),
            &[Arg::Lit("-m"), Arg::Lit("755"), Arg::Source, Arg::Executable],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        ..SHELL
    };
    let root = TempDir::new().unwrap();
    let job = job(&INSTALLED, scripts::COMPILED, None, limits(5_000));
    let telemetry = run_with(test_settings(root.path()), &job).await.unwrap();

    assert!(!telemetry.compile_failed);
    assert_eq!(telemetry.exit_code, Some(0));
    assert_eq!(telemetry.stdout, "compiled output\n");
}

#[tokio::test]
async fn test_workspace_removed_after_run() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let executor = SandboxExecutor::new(test_settings(root.path()));

    for script in [scripts::ECHO, scripts::EXIT_3, "echo leftover > artifact.txt"] {
        executor
            .run(&job(&SHELL, script, None, limits(5_000)), CancelToken::never())
            .await
            .unwrap();
    }

    let leftovers = std::fs::read_dir(root.path()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_rlimit_backend() {
    if skip_if_not_available(&["sh"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let settings = SandboxSettings {
        backend: IsolationBackend::Rlimit,
        ..test_settings(root.path())
    };
    let telemetry = run_with(settings, &job(&SHELL, scripts::ECHO, None, limits(2_000)))
        .await
        .unwrap();

    assert_eq!(telemetry.exit_code, Some(0));
    assert_eq!(telemetry.stdout, "hello from the sandbox\n");
}

#[tokio::test]
async fn test_cancellation_kills_run() {
    if skip_if_not_available(&["sh", "sleep"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let executor = SandboxExecutor::new(test_settings(root.path()));
    let (canceller, token) = CancelToken::new();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let telemetry = executor
        .run(&job(&SHELL, scripts::SLEEP_LONG, None, limits(20_000)), token)
        .await
        .unwrap();

    assert!(telemetry.cancelled);
    assert!(telemetry.killed_by_system);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        classifier::classify(&telemetry, &limits(20_000)),
        Status::InternalError
    );
}

#[tokio::test]
async fn test_missing_program_is_toolchain_unavailable() {
    const GHOST: LanguageSpec = LanguageSpec {
        run: CommandTemplate::new(Arg::Lit("definitely-not-an-installed-runtime"), &[Arg::Source]),
        ..SHELL
    };
    let root = TempDir::new().unwrap();
    let result = run_with(test_settings(root.path()), &job(&GHOST, "noop", None, limits(1_000))).await;

    assert!(matches!(result, Err(Error::ToolchainUnavailable(_))));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}
