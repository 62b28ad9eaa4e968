use tempfile::TempDir;

use super::{
    fixtures::{code_samples::*, request},
    utils::services::real_service,
};
use crate::{languages::skip_if_not_available, Status};

#[tokio::test]
async fn test_python_hello_world() {
    if skip_if_not_available(&["python3"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let result = service.execute(request("python", PYTHON_HELLO)).await.unwrap();
    assert_eq!(result.status, Status::Accepted);
    assert_eq!(result.stdout.trim(), "Hello from Python!");
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
async fn test_python_stdin() {
    if skip_if_not_available(&["python3"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let mut req = request("py", PYTHON_ECHO_INPUT);
    req.stdin = Some("World".to_string());
    let result = service.execute(req).await.unwrap();

    assert_eq!(result.status, Status::Accepted);
    assert_eq!(result.stdout.trim(), "Hello, World!");
}

#[tokio::test]
async fn test_python_infinite_loop_times_out() {
    if skip_if_not_available(&["python3"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let mut req = request("python", PYTHON_INFINITE_LOOP);
    req.time_limit_ms = Some(1_000);
    let result = service.execute(req).await.unwrap();

    assert_eq!(result.status, Status::TimeLimitExceeded);
    assert!(result.killed_by_system);
    assert!(result.execution_time_ms >= 1_000);
    assert!(result.execution_time_ms < 2_500, "took {} ms", result.execution_time_ms);
}

#[tokio::test]
async fn test_python_exception_is_runtime_error() {
    if skip_if_not_available(&["python3"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let result = service.execute(request("python", PYTHON_RAISES)).await.unwrap();
    assert_eq!(result.status, Status::RuntimeError);
    assert_eq!(result.exit_code, Some(1));
    assert!(result.stderr.contains("ValueError"));
}

#[tokio::test]
async fn test_javascript_hello_world() {
    if skip_if_not_available(&["node"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let result = service.execute(request("js", JS_HELLO)).await.unwrap();
    assert_eq!(result.status, Status::Accepted);
    assert_eq!(result.stdout.trim(), "Hello from JavaScript!");
}

#[tokio::test]
async fn test_cpp_compiles_and_runs() {
    if skip_if_not_available(&["g++"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let result = service.execute(request("cpp", CPP_HELLO)).await.unwrap();
    assert_eq!(result.status, Status::Accepted);
    assert_eq!(result.stdout.trim(), "Hello from C++!");
    assert!(result.metrics.compilation_time_ms > 0);
    assert!(result.metrics.total_time_ms >= result.metrics.compilation_time_ms);
}

#[tokio::test]
async fn test_cpp_syntax_error_is_runtime_error() {
    if skip_if_not_available(&["g++"]) {
        return;
    }
    let root = TempDir::new().unwrap();
    let service = real_service(root.path());

    let result = service.execute(request("c++", CPP_SYNTAX_ERROR)).await.unwrap();
    assert_eq!(result.status, Status::RuntimeError);
    assert!(result.stdout.is_empty());
    assert!(result.stderr.contains("error"));
    assert_eq!(result.execution_time_ms, 0);
    assert_eq!(result.metrics.total_time_ms, result.metrics.compilation_time_ms);
}

#[tokio::test]
async fn test_every_language_reports_tools() {
    let service = real_service(std::env::temp_dir().as_path());
    for spec in service.registry().languages() {
        assert!(!spec.required_tools().is_empty(), "{} has no tools", spec.id);
    }
}
