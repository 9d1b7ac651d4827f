use serde_json::Value;

use super::Executor;
use crate::{error::ExecError, guard::ResolvedPaths, proc::ProcessRunner};

fn project_args(slug: &str, paths: &ResolvedPaths, tail: &[&str]) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-p".into(),
        slug.into(),
        "-f".into(),
        paths.config.display().to_string(),
    ];
    args.extend(tail.iter().map(|s| s.to_string()));
    args
}

pub(super) async fn up<R: ProcessRunner>(
    exec: &Executor<R>,
    slug: &str,
    paths: &ResolvedPaths,
) -> Result<(), ExecError> {
    exec.exec(
        exec.docker(),
        project_args(slug, paths, &["up", "-d", "--build"]),
        Some(&paths.working_dir),
        exec.command_timeout(),
    )
    .await
    .map(drop)
}

pub(super) async fn down<R: ProcessRunner>(
    exec: &Executor<R>,
    slug: &str,
    paths: &ResolvedPaths,
) -> Result<(), ExecError> {
    exec.exec(
        exec.docker(),
        project_args(slug, paths, &["down", "-v"]),
        Some(&paths.working_dir),
        exec.command_timeout(),
    )
    .await
    .map(drop)
}

pub(super) async fn healthy<R: ProcessRunner>(
    exec: &Executor<R>,
    slug: &str,
    paths: &ResolvedPaths,
) -> Result<bool, ExecError> {
    let out = exec
        .exec(
            exec.docker(),
            project_args(slug, paths, &["ps", "--format", "json"]),
            Some(&paths.working_dir),
            exec.health_timeout(),
        )
        .await?;
    Ok(any_service_running(&out.output))
}

/// `docker compose ps --format json` prints either one object per line (v2.21+) or
/// a single array (older releases).
fn any_service_running(output: &str) -> bool {
    let trimmed = output.trim();
    if trimmed.starts_with('[') {
        return match serde_json::from_str::<Vec<Value>>(trimmed) {
            Ok(services) => services.iter().any(is_running),
            Err(_) => false,
        };
    }
    trimmed
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .any(|svc| is_running(&svc))
}

fn is_running(service: &Value) -> bool {
    service
        .get("State")
        .and_then(Value::as_str)
        .is_some_and(|state| state.eq_ignore_ascii_case("running"))
}
