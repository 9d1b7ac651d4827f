use super::Executor;
use crate::{error::ExecError, guard::ResolvedPaths, proc::ProcessRunner};

pub(super) async fn apply<R: ProcessRunner>(exec: &Executor<R>, paths: &ResolvedPaths) -> Result<(), ExecError> {
    let config = paths.config.display().to_string();
    exec.exec(
        exec.kubectl(),
        ["apply", "-f", config.as_str()],
        Some(&paths.working_dir),
        exec.command_timeout(),
    )
    .await
    .map(drop)
}

pub(super) async fn delete<R: ProcessRunner>(exec: &Executor<R>, paths: &ResolvedPaths) -> Result<(), ExecError> {
    let config = paths.config.display().to_string();
    exec.exec(
        exec.kubectl(),
        ["delete", "-f", config.as_str(), "--ignore-not-found"],
        Some(&paths.working_dir),
        exec.command_timeout(),
    )
    .await
    .map(drop)
}

/// At least one pod labelled `app=<slug>`.
///
/// Output is stdout+stderr combined, so only `pod/<name>` lines count.
pub(super) async fn healthy<R: ProcessRunner>(exec: &Executor<R>, slug: &str) -> Result<bool, ExecError> {
    let selector = format!("app={slug}");
    let out = exec
        .exec(
            exec.kubectl(),
            ["get", "pods", "-l", selector.as_str(), "-o", "name"],
            None,
            exec.health_timeout(),
        )
        .await?;
    Ok(out.output.lines().any(|line| line.trim().starts_with("pod/")))
}
