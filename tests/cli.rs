//! Exit-code and diagnostics behavior of the `worker` binary.

use std::process::Command;

fn worker_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_worker"))
}

#[test]
fn no_args_exits_one_with_usage() {
    let out = worker_cmd().output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.to_lowercase().contains("usage"),
        "stderr missing usage: {stderr}"
    );
    assert!(out.stdout.is_empty());
}

#[test]
fn extra_args_exit_one_with_usage() {
    let out = worker_cmd().args(["ctx.json", "surplus"]).output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.to_lowercase().contains("usage"),
        "stderr missing usage: {stderr}"
    );
}

#[test]
fn missing_context_file_is_fatal() {
    let out = worker_cmd()
        .arg("/nonexistent/worker-context.json")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("worker-context.json"),
        "stderr missing path: {stderr}"
    );
}

/// An undecodable context terminates the process before it ever tries to
/// reach the chief: with a 30s connect bound, a prompt exit can only
/// mean no connection was attempted.
#[test]
fn invalid_context_file_fails_before_connecting() {
    let path = std::env::temp_dir().join(format!("bad-context-{}.json", std::process::id()));
    std::fs::write(&path, "{\"debug\": maybe}").unwrap();

    let start = std::time::Instant::now();
    let out = worker_cmd().arg(&path).output().unwrap();
    let elapsed = start.elapsed();
    std::fs::remove_file(&path).ok();

    assert_eq!(out.status.code(), Some(1));
    assert!(elapsed < std::time::Duration::from_secs(10));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("invalid context"),
        "stderr missing diagnostic: {stderr}"
    );
}

/// A context whose chief is unreachable fails the run (exactly one
/// connect attempt, no retry loop).
#[test]
fn unreachable_chief_is_fatal() {
    let path = std::env::temp_dir().join(format!("orphan-context-{}.json", std::process::id()));
    let context = serde_json::json!({
        "debug": false,
        "broadcast": {"publish": 1, "subscribe": 1},
        "rendezvous": {"rank": 0, "size": 1}
    });
    std::fs::write(&path, context.to_string()).unwrap();

    let out = worker_cmd().arg(&path).output().unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        stderr.contains("connect"),
        "stderr missing connect diagnostic: {stderr}"
    );
}
