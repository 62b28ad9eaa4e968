//! Maps raw sandbox telemetry to a normalized [`Status`] and builds the
//! externally visible [`ExecutionResult`].

use nix::sys::signal::Signal;

use crate::types::{
    ExecutionMetrics, ExecutionResult, ExecutionTelemetry, ResourceLimits, ResourceUsage, Status,
};

/// Classify a run. Rules are checked in order and the first match wins;
/// resource violations outrank generic runtime failure.
pub fn classify(telemetry: &ExecutionTelemetry, _limits: &ResourceLimits) -> Status {
    if telemetry.timed_out {
        Status::TimeLimitExceeded
    } else if telemetry.memory_exceeded {
        Status::MemoryLimitExceeded
    } else if telemetry.killed_by_system {
        Status::InternalError
    } else if telemetry.signal.is_some() {
        Status::RuntimeError
    } else if telemetry.exit_code.is_some_and(|code| code != 0) {
        Status::RuntimeError
    } else if telemetry.compile_failed {
        Status::RuntimeError
    } else {
        Status::Accepted
    }
}

/// Build the result for a completed run
pub fn assemble(telemetry: ExecutionTelemetry, limits: &ResourceLimits) -> ExecutionResult {
    let status = classify(&telemetry, limits);
    let error = describe(status, &telemetry, limits);

    ExecutionResult {
        status,
        error,
        execution_time_ms: telemetry.wall_time_ms,
        resource_usage: ResourceUsage {
            peak_memory_bytes: telemetry.peak_memory_bytes,
            average_memory_bytes: telemetry.average_memory_bytes,
            peak_cpu_percent: telemetry.peak_cpu_percent,
            average_cpu_percent: telemetry.average_cpu_percent,
        },
        exit_code: telemetry.exit_code,
        signal: telemetry.signal.map(signal_name),
        killed_by_system: telemetry.killed_by_system,
        metrics: ExecutionMetrics {
            compilation_time_ms: telemetry.compile_time_ms,
            total_time_ms: telemetry.compile_time_ms + telemetry.wall_time_ms,
        },
        stdout: telemetry.stdout,
        stderr: telemetry.stderr,
    }
}

fn describe(status: Status, telemetry: &ExecutionTelemetry, limits: &ResourceLimits) -> Option<String> {
    let phase = if telemetry.compile_failed { "compilation" } else { "execution" };
    match status {
        Status::Accepted | Status::Idle => None,
        Status::TimeLimitExceeded if telemetry.compile_failed => {
            Some("compilation timed out".to_string())
        }
        Status::TimeLimitExceeded => Some(format!(
            "time limit of {} ms exceeded",
            limits.time_limit_ms
        )),
        Status::MemoryLimitExceeded if telemetry.compile_failed => {
            Some("compilation exceeded the compiler memory limit".to_string())
        }
        Status::MemoryLimitExceeded => Some(format!(
            "memory limit of {} bytes exceeded",
            limits.memory_limit_bytes
        )),
        Status::InternalError if telemetry.cancelled => Some("execution cancelled".to_string()),
        Status::InternalError => Some(format!("{} killed by the host", phase)),
        Status::RuntimeError if telemetry.compile_failed => Some(match telemetry.exit_code {
            Some(code) => format!("compilation failed with exit code {}", code),
            None => "compilation failed".to_string(),
        }),
        Status::RuntimeError => Some(match (telemetry.signal, telemetry.exit_code) {
            (Some(sig), _) => format!("process terminated by {}", signal_name(sig)),
            (None, Some(code)) => format!("process exited with code {}", code),
            (None, None) => "process terminated abnormally".to_string(),
        }),
        Status::InternalError | Status::Failed => None,
    }
}

fn signal_name(signal: i32) -> String {
    Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {}", signal))
}

/// Result for a host-level fault (sandbox allocation, store outage, ...)
pub fn internal_error(message: impl Into<String>) -> ExecutionResult {
    ExecutionResult {
        status: Status::InternalError,
        error: Some(message.into()),
        ..Default::default()
    }
}

/// Result for a submission the node cannot run, e.g. a missing toolchain
pub fn failed(message: impl Into<String>) -> ExecutionResult {
    ExecutionResult {
        status: Status::Failed,
        error: Some(message.into()),
        ..Default::default()
    }
}
