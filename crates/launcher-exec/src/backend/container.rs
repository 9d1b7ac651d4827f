use launcher_core::parse_used_host_ports;
use launcher_model::{PortMapping, WorkloadSpec};
use tracing::{debug, warn};

use super::Executor;
use crate::{error::ExecError, guard::ResolvedPaths, proc::ProcessRunner};

/// Build the image, drop any stale container, publish every declared container port on a
/// random free host port.
pub(super) async fn up<R: ProcessRunner>(
    exec: &Executor<R>,
    spec: &WorkloadSpec,
    paths: &ResolvedPaths,
) -> Result<Vec<PortMapping>, ExecError> {
    let slug = spec.slug.as_str();
    let config = paths.config.display().to_string();

    exec.exec(
        exec.docker(),
        ["build", "-t", slug, "-f", config.as_str(), "."],
        Some(&paths.working_dir),
        exec.command_timeout(),
    )
    .await?;

    if exec
        .exec(exec.docker(), ["rm", "-f", slug], None, exec.command_timeout())
        .await
        .is_ok()
    {
        debug!(%slug, "stale container removed");
    }

    let container_ports = spec.container_ports();
    let mut mappings = Vec::with_capacity(container_ports.len());
    let mut args: Vec<String> = vec!["run".into(), "-d".into(), "--name".into(), slug.into()];

    // Stopped and created containers keep their port reservations, hence `-a`.
    // Held until `docker run` returns so concurrent starts cannot draw the same ports.
    let _lease = if container_ports.is_empty() {
        None
    } else {
        let listing = exec
            .exec(
                exec.docker(),
                ["ps", "-a", "--format", "{{.Ports}}"],
                None,
                exec.health_timeout(),
            )
            .await?;
        let in_use = parse_used_host_ports(&listing.output);
        let lease = exec.allocator().allocate(container_ports.len(), &in_use)?;

        for (host, container) in lease.ports().iter().zip(&container_ports) {
            args.push("-p".into());
            args.push(format!("{host}:{container}"));
            mappings.push(PortMapping::mapped(*host, *container));
        }
        Some(lease)
    };
    args.push(slug.into());

    exec.exec(exec.docker(), args, Some(&paths.working_dir), exec.command_timeout())
        .await?;
    Ok(mappings)
}

/// `docker stop` then `docker rm -f`. A failed stop is tolerated when removal succeeds.
pub(super) async fn remove<R: ProcessRunner>(exec: &Executor<R>, slug: &str) -> Result<(), ExecError> {
    let stopped = exec
        .exec(exec.docker(), ["stop", slug], None, exec.command_timeout())
        .await;
    let removed = exec
        .exec(exec.docker(), ["rm", "-f", slug], None, exec.command_timeout())
        .await;

    match (stopped, removed) {
        (_, Ok(_)) => Ok(()),
        (Err(stop_err), Err(rm_err)) => {
            warn!(%slug, error = %rm_err, "container removal failed too");
            Err(stop_err)
        }
        (Ok(_), Err(rm_err)) => Err(rm_err),
    }
}

pub(super) async fn healthy<R: ProcessRunner>(exec: &Executor<R>, slug: &str) -> Result<bool, ExecError> {
    let name_filter = format!("name=^/{slug}$");
    let out = exec
        .exec(
            exec.docker(),
            [
                "ps",
                "--filter",
                name_filter.as_str(),
                "--filter",
                "status=running",
                "--format",
                "{{.Names}}",
            ],
            None,
            exec.health_timeout(),
        )
        .await?;
    Ok(out.output.lines().any(|name| name.trim() == slug))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use launcher_core::PortAllocator;
    use launcher_model::BackendKind;

    use super::*;
    use crate::{
        backend::{
            Lifecycle,
            testing::{FakeRunner, workload},
        },
        config::ExecConfig,
        proc::CommandOutput,
    };

    fn executor(runner: FakeRunner) -> Executor<FakeRunner> {
        Executor::with_allocator(
            runner,
            ExecConfig::default(),
            PortAllocator::with_seed(50000..=50003, 9),
        )
    }

    #[tokio::test]
    async fn start_publishes_free_ports() {
        let runner = FakeRunner::new().on(
            "ps -a --format {{.Ports}}",
            CommandOutput::ok("0.0.0.0:50000->80/tcp, :::50000->80/tcp\n0.0.0.0:50001->22/tcp\n"),
        );
        let exec = executor(runner);
        let (_dir, spec) = workload(
            BackendKind::Container,
            vec![PortMapping::unmapped(80), PortMapping::unmapped(443)],
        );

        let ports = exec.start(&spec).await.unwrap();
        assert_eq!(ports.len(), 2);
        let hosts: HashSet<u16> = ports.iter().filter_map(|p| p.host).collect();
        assert_eq!(hosts, HashSet::from([50002, 50003]));
        assert_eq!(ports[0].container, 80);
        assert_eq!(ports[1].container, 443);
        assert_eq!(exec.allocator().leased(), 0);

        let cmds = exec.runner.commands();
        assert!(cmds[0].starts_with("docker build -t ctf-web-login -f "));
        assert_eq!(cmds[1], "docker rm -f ctf-web-login");
        let run = cmds.last().unwrap();
        assert!(run.starts_with("docker run -d --name ctf-web-login -p "));
        assert!(run.ends_with(" ctf-web-login"));
        assert!(run.contains(&format!("{}:80", ports[0].host.unwrap())));
    }

    #[tokio::test]
    async fn port_scan_includes_stopped_containers() {
        // Only an exited container holds 50000..=50002; a running-only scan would miss it.
        let runner = FakeRunner::new().on(
            "ps -a --format {{.Ports}}",
            CommandOutput::ok("0.0.0.0:50000-50002->8000-8002/tcp\n"),
        );
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, vec![PortMapping::unmapped(80)]);

        let ports = exec.start(&spec).await.unwrap();
        assert_eq!(ports, vec![PortMapping::mapped(50003, 80)]);
        assert!(
            exec.runner
                .commands()
                .contains(&"docker ps -a --format {{.Ports}}".to_string())
        );
    }

    #[tokio::test]
    async fn failed_run_reports_no_ports() {
        let runner = FakeRunner::new().on("docker run", CommandOutput::failed(125, "port is already allocated"));
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, vec![PortMapping::unmapped(80)]);

        assert!(exec.start(&spec).await.is_err());
        assert_eq!(exec.allocator().leased(), 0);
    }

    #[tokio::test]
    async fn failed_build_stops_early() {
        let runner = FakeRunner::new().on("docker build", CommandOutput::failed(1, "syntax error"));
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, vec![PortMapping::unmapped(80)]);

        assert!(matches!(exec.start(&spec).await, Err(ExecError::NonZeroExit { .. })));
        assert_eq!(exec.runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_range_fails_before_run() {
        let runner = FakeRunner::new().on(
            "ps -a --format {{.Ports}}",
            CommandOutput::ok("0.0.0.0:50000-50003->1000-1003/tcp\n"),
        );
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, vec![PortMapping::unmapped(80)]);

        assert!(matches!(exec.start(&spec).await, Err(ExecError::Ports(_))));
        assert!(!exec.runner.commands().iter().any(|c| c.starts_with("docker run")));
    }

    #[tokio::test]
    async fn stop_tolerates_missing_container() {
        let runner = FakeRunner::new().on("docker stop", CommandOutput::failed(1, "No such container"));
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, Vec::new());

        exec.stop(&spec).await.unwrap();
        assert_eq!(
            exec.runner.commands(),
            vec!["docker stop ctf-web-login", "docker rm -f ctf-web-login"]
        );
    }

    #[tokio::test]
    async fn health_requires_exact_name() {
        let runner = FakeRunner::new().on("status=running", CommandOutput::ok("ctf-web-login-old\n"));
        let exec = executor(runner);
        let (_dir, spec) = workload(BackendKind::Container, Vec::new());
        assert!(!exec.check_health(&spec).await.unwrap());
    }
}
